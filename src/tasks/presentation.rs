// VoltWatch — Presentation Task
//
// The peer of the acquisition task. Pulls snapshots through the try-lock
// channel and hands fresh ones to whatever draws them. It parks at the
// lockout checkpoint once per iteration so flash commits can stop it
// completely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::*;
use crate::lockout::LockoutVictim;
use crate::shared::{MetricsConsumer, Snapshot};
use crate::watchdog::Watchdog;

/// Rendering backend. Drawing itself happens outside the core.
pub trait Presenter {
    /// A fresh snapshot arrived.
    fn present(&mut self, snapshot: &Snapshot);

    /// The producer's heartbeat has not moved for `silent_ms`.
    fn stalled(&mut self, silent_ms: u32) {
        let _ = silent_ms;
    }
}

/// Logs one status line per interval.
pub struct LogPresenter {
    interval_ms: u32,
    last_log_ms: Option<u32>,
    lines: u32,
}

impl LogPresenter {
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            last_log_ms: None,
            lines: 0,
        }
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }
}

impl Default for LogPresenter {
    fn default() -> Self {
        Self::new(STATUS_LOG_INTERVAL_MS)
    }
}

impl Presenter for LogPresenter {
    fn present(&mut self, snapshot: &Snapshot) {
        let now = crate::now_ms();
        if let Some(last) = self.last_log_ms {
            if now.wrapping_sub(last) < self.interval_ms {
                return;
            }
        }
        self.last_log_ms = Some(now);
        self.lines += 1;

        let m = &snapshot.metrics;
        log::info!(
            "{:.3} V | raw {} filt {} | buf {} ovf {} | {} {}%{}",
            m.average_volts,
            m.raw_sample,
            m.derived_sample,
            m.buffer_count,
            m.overflow_count,
            m.collector_state.label(),
            m.capture_progress,
            match m.last_slot {
                Some(slot) => format!(" | slot {slot}"),
                None => String::new(),
            }
        );
    }

    fn stalled(&mut self, silent_ms: u32) {
        log::warn!("Acquisition heartbeat silent for {} ms", silent_ms);
    }
}

pub fn presentation_task<P, W>(
    consumer: MetricsConsumer,
    victim: LockoutVictim,
    watchdog: W,
    mut presenter: P,
    running: Arc<AtomicBool>,
) where
    P: Presenter,
    W: Watchdog,
{
    log::info!("Presentation task started");
    watchdog.register();

    let poll_interval = Duration::from_millis(UI_POLL_INTERVAL_MS);
    let mut last_beat = consumer.heartbeat();
    let mut last_beat_ms = crate::now_ms();
    let mut stall_reported = false;

    while running.load(Ordering::Relaxed) {
        // 1. Park here if a flash commit is in progress.
        victim.checkpoint();
        watchdog.feed();

        // 2. Latest record, if the producer is not holding it.
        if let Some(snapshot) = consumer.try_snapshot() {
            if snapshot.fresh {
                presenter.present(&snapshot);
            }
        }

        // 3. Liveness is judged by the heartbeat, not by freshness.
        let beat = consumer.heartbeat();
        let now = crate::now_ms();
        if beat != last_beat {
            last_beat = beat;
            last_beat_ms = now;
            stall_reported = false;
        } else if !stall_reported && now.wrapping_sub(last_beat_ms) > WATCHDOG_TIMEOUT_MS {
            presenter.stalled(now.wrapping_sub(last_beat_ms));
            stall_reported = true;
        }

        thread::sleep(poll_interval);
    }

    log::info!("Presentation task exiting");
}
