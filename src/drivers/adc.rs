// VoltWatch — ADC Converter (ESP32-C3)
//
// ADC1 oneshot conversions paced by a periodic esp_timer. The timer callback
// is the transfer side of the ping-pong: it reads one conversion, stores it
// and, every `buffer_len` samples, runs the completion handler.
//
// GPIO2 / ADC1_CHANNEL_2 with 11 dB attenuation (0–3.3 V range).

use std::sync::Arc;
use std::time::Duration;

use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};

use crate::acquisition::{Converter, PingPong};
use crate::config::AcquisitionConfig;
use crate::error::AcquisitionError;

/// Owned oneshot unit handle.
struct AdcUnit {
    handle: esp_idf_sys::adc_oneshot_unit_handle_t,
    channel: esp_idf_sys::adc_channel_t,
}

// SAFETY: the handle is only used from the timer callback once claimed, and
// the oneshot driver serialises access to the unit internally.
unsafe impl Send for AdcUnit {}
unsafe impl Sync for AdcUnit {}

impl AdcUnit {
    fn new(channel: u32) -> Result<Self, AcquisitionError> {
        unsafe {
            let mut handle: esp_idf_sys::adc_oneshot_unit_handle_t = core::ptr::null_mut();
            let unit_cfg = esp_idf_sys::adc_oneshot_unit_init_cfg_t {
                unit_id: esp_idf_sys::adc_unit_t_ADC_UNIT_1,
                ulp_mode: esp_idf_sys::adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
                ..core::mem::zeroed()
            };
            let ret = esp_idf_sys::adc_oneshot_new_unit(&unit_cfg, &mut handle);
            if ret != esp_idf_sys::ESP_OK {
                return Err(AcquisitionError::ResourceUnavailable(format!(
                    "ADC unit init failed ({ret})"
                )));
            }
            let unit = Self {
                handle,
                channel: channel as esp_idf_sys::adc_channel_t,
            };

            let chan_cfg = esp_idf_sys::adc_oneshot_chan_cfg_t {
                atten: esp_idf_sys::adc_atten_t_ADC_ATTEN_DB_11,
                bitwidth: esp_idf_sys::adc_bitwidth_t_ADC_BITWIDTH_12,
            };
            let ret = esp_idf_sys::adc_oneshot_config_channel(unit.handle, unit.channel, &chan_cfg);
            if ret != esp_idf_sys::ESP_OK {
                return Err(AcquisitionError::ResourceUnavailable(format!(
                    "ADC channel {channel} config failed ({ret})"
                )));
            }
            Ok(unit)
        }
    }

    fn read(&self) -> Option<u16> {
        let mut raw: i32 = 0;
        let ret = unsafe { esp_idf_sys::adc_oneshot_read(self.handle, self.channel, &mut raw) };
        (ret == esp_idf_sys::ESP_OK).then_some(raw as u16)
    }
}

impl Drop for AdcUnit {
    fn drop(&mut self) {
        unsafe {
            esp_idf_sys::adc_oneshot_del_unit(self.handle);
        }
    }
}

pub struct AdcConverter {
    timers: EspTaskTimerService,
    timer: Option<EspTimer<'static>>,
    period: Duration,
}

impl AdcConverter {
    pub fn new() -> Result<Self, AcquisitionError> {
        let timers = EspTaskTimerService::new()
            .map_err(|e| AcquisitionError::ResourceUnavailable(format!("timer service: {e}")))?;
        Ok(Self {
            timers,
            timer: None,
            period: Duration::ZERO,
        })
    }
}

impl Converter for AdcConverter {
    fn claim(
        &mut self,
        config: &AcquisitionConfig,
        exchange: Arc<PingPong>,
    ) -> Result<(), AcquisitionError> {
        let unit = AdcUnit::new(config.channel)?;
        let timer = self
            .timers
            .timer(move || {
                // A failed read skips the slot instead of storing garbage.
                if let Some(sample) = unit.read() {
                    exchange.push(sample);
                }
            })
            .map_err(|e| AcquisitionError::ResourceUnavailable(format!("timer: {e}")))?;

        self.period = Duration::from_micros(u64::from(config.period_us()));
        self.timer = Some(timer);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AcquisitionError> {
        let timer = self.timer.as_ref().ok_or(AcquisitionError::NotInitialized)?;
        timer
            .every(self.period)
            .map_err(|e| AcquisitionError::Converter(format!("timer start: {e}")))
    }

    fn stop(&mut self) {
        if let Some(timer) = self.timer.as_ref() {
            if let Err(e) = timer.cancel() {
                log::warn!("ADC timer cancel failed: {}", e);
            }
        }
    }
}
