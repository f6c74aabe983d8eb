// VoltWatch — Simulated Peripherals
//
// Stand-ins for the converter on hosted builds. A background thread plays the
// timer: it pushes as many samples as wall-clock time says are due, so the
// ping-pong sees the same buffer cadence as on the device (in 1 ms bursts).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::acquisition::{Converter, PingPong};
use crate::config::{AcquisitionConfig, ADC_MAX};
use crate::error::AcquisitionError;

/// Synthetic input: DC level plus a sine, low-level noise and a periodic
/// single-sample spike like motor commutation noise.
#[derive(Debug, Clone, Copy)]
pub struct Waveform {
    pub dc: f32,
    pub amplitude: f32,
    pub frequency_hz: f32,
    pub noise: u16,
    /// Every `spike_every`-th sample jumps to full scale. 0 disables.
    pub spike_every: u32,
}

impl Default for Waveform {
    fn default() -> Self {
        Self {
            dc: 2048.0,
            amplitude: 400.0,
            frequency_hz: 50.0,
            noise: 8,
            spike_every: 997,
        }
    }
}

impl Waveform {
    fn sample(&self, n: u64, rate_hz: u32, rng: &mut u32) -> u16 {
        if self.spike_every > 0 && n % u64::from(self.spike_every) == 0 && n > 0 {
            return ADC_MAX;
        }
        let t = n as f32 / rate_hz as f32;
        let mut v = self.dc + self.amplitude * (2.0 * core::f32::consts::PI * self.frequency_hz * t).sin();
        if self.noise > 0 {
            // xorshift32
            *rng ^= *rng << 13;
            *rng ^= *rng >> 17;
            *rng ^= *rng << 5;
            let span = u32::from(self.noise) * 2 + 1;
            v += (*rng % span) as f32 - f32::from(self.noise);
        }
        v.round().clamp(0.0, f32::from(ADC_MAX)) as u16
    }
}

pub struct SimulatedConverter {
    waveform: Waveform,
    fail_claim: bool,
    rate_hz: u32,
    exchange: Option<Arc<PingPong>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedConverter {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            fail_claim: false,
            rate_hz: 0,
            exchange: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// A converter whose claim always fails, for exercising fatal init.
    pub fn unavailable() -> Self {
        let mut converter = Self::new(Waveform::default());
        converter.fail_claim = true;
        converter
    }
}

impl Converter for SimulatedConverter {
    fn claim(
        &mut self,
        config: &AcquisitionConfig,
        exchange: Arc<PingPong>,
    ) -> Result<(), AcquisitionError> {
        if self.fail_claim {
            return Err(AcquisitionError::ResourceUnavailable(
                "simulated converter busy".into(),
            ));
        }
        if config.sample_rate_hz == 0 {
            return Err(AcquisitionError::Converter("sample rate is zero".into()));
        }
        self.rate_hz = config.sample_rate_hz;
        self.exchange = Some(exchange);
        log::info!(
            "Simulated converter on channel {} at {} Hz",
            config.channel,
            config.sample_rate_hz
        );
        Ok(())
    }

    fn start(&mut self) -> Result<(), AcquisitionError> {
        let exchange = self
            .exchange
            .clone()
            .ok_or(AcquisitionError::NotInitialized)?;
        if self.worker.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let waveform = self.waveform;
        let rate = self.rate_hz;
        let worker = thread::Builder::new()
            .name("sim-adc".into())
            .spawn(move || {
                let t0 = Instant::now();
                let mut produced: u64 = 0;
                let mut rng: u32 = 0x1234_5678;
                while running.load(Ordering::Relaxed) {
                    let due = t0.elapsed().as_micros() as u64 * u64::from(rate) / 1_000_000;
                    while produced < due {
                        exchange.push(waveform.sample(produced, rate, &mut rng));
                        produced += 1;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .map_err(|e| AcquisitionError::Converter(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Simulated converter thread panicked");
            }
        }
    }
}

impl Drop for SimulatedConverter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::AcquisitionEngine;

    #[test]
    fn produces_buffers_in_real_time() {
        let config = AcquisitionConfig {
            sample_rate_hz: 5000,
            buffer_len: 100,
            channel: 0,
        };
        let mut engine = AcquisitionEngine::new(SimulatedConverter::new(Waveform::default()), config);
        engine.init().unwrap();
        engine.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut drained = 0;
        while drained < 5 && Instant::now() < deadline {
            if let Some(buf) = engine.acquire_ready() {
                assert_eq!(buf.samples().len(), 100);
                buf.release();
                drained += 1;
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        engine.stop();
        assert_eq!(drained, 5);
        assert!(engine.buffer_count() >= 5);
    }

    #[test]
    fn unavailable_converter_fails_init() {
        let mut engine =
            AcquisitionEngine::new(SimulatedConverter::unavailable(), AcquisitionConfig::default());
        assert!(matches!(
            engine.init(),
            Err(AcquisitionError::ResourceUnavailable(_))
        ));
    }

    #[test]
    fn waveform_spikes_and_stays_in_range() {
        let w = Waveform::default();
        let mut rng = 1;
        assert_eq!(w.sample(997, 5000, &mut rng), ADC_MAX);
        for n in 1..997 {
            let s = w.sample(n, 5000, &mut rng);
            assert!((1600..=2500).contains(&s), "sample {n} = {s}");
        }
    }
}
