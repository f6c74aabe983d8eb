// VoltWatch — Acquisition Task
//
// Owns the acquisition engine, the filter chain, the collection controller
// and (through it) the capture store. Polls for ready buffers instead of
// blocking on them: the 1 ms idle back-off is the scheduling model, and the
// heartbeat and watchdog are serviced every iteration whether or not a buffer
// was ready.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::acquisition::{AcquisitionEngine, Converter};
use crate::collector::CollectionController;
use crate::commands::{self, CommandReceiver};
use crate::config::*;
use crate::events::SharedMetrics;
use crate::filter::SignalPipeline;
use crate::shared::MetricsProducer;
use crate::storage::{CaptureStore, FlashRegion};
use crate::watchdog::Watchdog;

pub type Collector<F, W> = CollectionController<CaptureStore<F, W>>;

pub struct AcquisitionTask<C: Converter, F: FlashRegion, W: Watchdog> {
    engine: AcquisitionEngine<C>,
    pipeline: SignalPipeline,
    calibration: Calibration,
    collector: Collector<F, W>,
    metrics: MetricsProducer,
    commands: CommandReceiver,
    watchdog: W,
    derived: Vec<u16>,
    samples_processed: u64,
    loop_count: u32,
    overflows_seen: u32,
}

impl<C: Converter, F: FlashRegion, W: Watchdog> AcquisitionTask<C, F, W> {
    /// `engine` must already be initialised and started.
    pub fn new(
        engine: AcquisitionEngine<C>,
        filter: FilterConfig,
        calibration: Calibration,
        collector: Collector<F, W>,
        metrics: MetricsProducer,
        commands: CommandReceiver,
        watchdog: W,
    ) -> Self {
        let derived = Vec::with_capacity(engine.config().buffer_len);
        Self {
            engine,
            pipeline: SignalPipeline::new(filter),
            calibration,
            collector,
            metrics,
            commands,
            watchdog,
            derived,
            samples_processed: 0,
            loop_count: 0,
            overflows_seen: 0,
        }
    }

    /// One loop iteration. Returns whether a buffer was processed.
    pub fn step(&mut self) -> bool {
        self.loop_count = self.loop_count.wrapping_add(1);
        self.metrics.beat();
        self.watchdog.feed();

        while let Some(req) = self.commands.try_next() {
            let response = commands::execute(&mut self.collector, req.command);
            req.respond(response);
        }

        let Some(buf) = self.engine.acquire_ready() else {
            return false;
        };

        self.derived.clear();
        let mut sum = 0.0f32;
        for &raw in buf.samples() {
            let y = self.pipeline.process(raw);
            sum += y;
            self.derived.push(self.calibration.to_sample(y));
        }
        let len = buf.len();

        if self.collector.is_collecting() {
            let derived = self.collector.wants_derived().then_some(self.derived.as_slice());
            if let Err(e) = self.collector.ingest(buf.samples(), derived, len) {
                log::error!("Collection ingest failed: {}", e);
            }
        }

        let raw_sample = buf.samples().last().copied().unwrap_or(0);
        buf.release();

        self.samples_processed += len as u64;
        let average = if len > 0 { sum / len as f32 } else { 0.0 };

        let overflows = self.engine.overflow_count();
        if overflows != self.overflows_seen {
            log::warn!(
                "Buffer overflow: {} lost of {} completed",
                overflows,
                self.engine.buffer_count()
            );
            self.overflows_seen = overflows;
        }

        let snapshot = SharedMetrics {
            average_volts: self.calibration.volts(average),
            raw_sample,
            derived_sample: self.derived.last().copied().unwrap_or(0),
            buffer_count: self.engine.buffer_count(),
            overflow_count: overflows,
            samples_processed: self.samples_processed,
            loop_count: self.loop_count,
            collector_state: self.collector.state(),
            capture_progress: self.collector.progress(),
            last_slot: self.collector.last_slot(),
            fresh: true,
        };
        // Contention only costs this cycle's update.
        self.metrics.try_publish(&snapshot);
        true
    }

    pub fn engine(&self) -> &AcquisitionEngine<C> {
        &self.engine
    }

    pub fn collector(&self) -> &Collector<F, W> {
        &self.collector
    }

    pub fn collector_mut(&mut self) -> &mut Collector<F, W> {
        &mut self.collector
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }
}

/// Run until `running` is cleared. On device nothing clears it.
pub fn acquisition_task<C, F, W>(mut task: AcquisitionTask<C, F, W>, running: Arc<AtomicBool>)
where
    C: Converter,
    F: FlashRegion,
    W: Watchdog,
{
    log::info!("Acquisition task started");
    task.watchdog.register();

    let idle = Duration::from_millis(ACQ_IDLE_POLL_MS);
    while running.load(Ordering::Relaxed) {
        if !task.step() {
            thread::sleep(idle);
        }
    }

    task.engine.stop();
    log::info!(
        "Acquisition task exiting after {} samples ({} buffers, {} overflows)",
        task.samples_processed,
        task.engine.buffer_count(),
        task.engine.overflow_count()
    );
}
