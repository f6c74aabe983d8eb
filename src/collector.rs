// VoltWatch — Collection Controller
//
// Turns the continuous sample stream into a bounded capture: allocate
// buffers for N seconds, copy every ready chunk in until full, then hand the
// whole thing to the capture store in one commit.
//
//   Idle ──start──▶ Preparing ──alloc ok──▶ Collecting ──full──▶ WritingStore
//     ▲                 │                      │                  │      │
//     └────cancel───────┴──────────────────────┘              Complete  Error
//
// Complete and Error both accept a new start. Buffers are released on every
// path out of WritingStore and on cancel.

use std::time::Duration;

use crate::error::{CollectError, StoreError};
use crate::events::CollectorState;
use crate::storage::{CaptureStore, FlashRegion};
use crate::watchdog::Watchdog;

/// Where a finished capture goes.
pub trait CaptureSink {
    fn commit(
        &mut self,
        raw: &[u16],
        derived: Option<&[u16]>,
        count: usize,
        timestamp: u32,
    ) -> Result<usize, StoreError>;
}

impl<F: FlashRegion, W: Watchdog> CaptureSink for CaptureStore<F, W> {
    fn commit(
        &mut self,
        raw: &[u16],
        derived: Option<&[u16]>,
        count: usize,
        timestamp: u32,
    ) -> Result<usize, StoreError> {
        CaptureStore::commit(self, raw, derived, count, timestamp)
    }
}

pub struct CollectionController<S: CaptureSink> {
    sink: S,
    sample_rate_hz: u32,
    state: CollectorState,
    raw: Vec<u16>,
    derived: Option<Vec<u16>>,
    target: usize,
    last_slot: Option<usize>,
    last_error: Option<StoreError>,
}

impl<S: CaptureSink> CollectionController<S> {
    pub fn new(sink: S, sample_rate_hz: u32) -> Self {
        Self {
            sink,
            sample_rate_hz,
            state: CollectorState::Idle,
            raw: Vec::new(),
            derived: None,
            target: 0,
            last_slot: None,
            last_error: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Begin a capture of `duration` at the configured rate. Allowed from
    /// Idle, Complete or Error.
    pub fn start(&mut self, duration: Duration, want_derived: bool) -> Result<(), CollectError> {
        match self.state {
            CollectorState::Idle | CollectorState::Complete | CollectorState::Error => {}
            other => return Err(CollectError::InvalidState(other)),
        }
        let target = (u128::from(self.sample_rate_hz) * duration.as_millis() / 1000) as usize;
        if target == 0 {
            return Err(CollectError::InvalidDuration(duration.as_millis() as u64));
        }

        self.state = CollectorState::Preparing;
        self.last_error = None;

        let mut raw = Vec::new();
        if raw.try_reserve_exact(target).is_err() {
            log::error!("Cannot allocate {} raw samples", target);
            self.state = CollectorState::Error;
            return Err(CollectError::AllocationFailure { samples: target });
        }
        let derived = if want_derived {
            let mut d = Vec::new();
            if d.try_reserve_exact(target).is_err() {
                log::error!("Cannot allocate {} derived samples", target);
                self.state = CollectorState::Error;
                return Err(CollectError::AllocationFailure { samples: target });
            }
            Some(d)
        } else {
            None
        };

        self.raw = raw;
        self.derived = derived;
        self.target = target;
        self.state = CollectorState::Collecting;
        log::info!(
            "Collecting {} samples ({} ms{})",
            target,
            duration.as_millis(),
            if want_derived { ", with filtered channel" } else { "" }
        );
        Ok(())
    }

    /// Append up to `count` samples from a ready chunk. Finalizes
    /// automatically once the target is reached. Returns how many were taken.
    pub fn ingest(
        &mut self,
        raw: &[u16],
        derived: Option<&[u16]>,
        count: usize,
    ) -> Result<usize, CollectError> {
        if self.state != CollectorState::Collecting {
            return Err(CollectError::InvalidState(self.state));
        }
        let mut take = count.min(raw.len()).min(self.target - self.raw.len());
        if let (Some(_), Some(d)) = (&self.derived, derived) {
            take = take.min(d.len());
        }

        self.raw.extend_from_slice(&raw[..take]);
        if let Some(buf) = self.derived.as_mut() {
            match derived {
                Some(d) => buf.extend_from_slice(&d[..take]),
                // Keep both channels the same length.
                None => buf.extend_from_slice(&raw[..take]),
            }
        }

        if self.raw.len() >= self.target {
            self.finalize()?;
        }
        Ok(take)
    }

    /// Commit whatever has been collected. Buffers are freed regardless of
    /// the outcome.
    pub fn finalize(&mut self) -> Result<usize, CollectError> {
        if self.state != CollectorState::Collecting {
            return Err(CollectError::InvalidState(self.state));
        }
        self.state = CollectorState::WritingStore;

        let raw = std::mem::take(&mut self.raw);
        let derived = self.derived.take();
        let count = raw.len();
        let result = self
            .sink
            .commit(&raw, derived.as_deref(), count, crate::now_ms());
        drop(raw);
        drop(derived);
        self.target = 0;

        match result {
            Ok(slot) => {
                log::info!("Capture complete: {} samples in slot {}", count, slot);
                self.state = CollectorState::Complete;
                self.last_slot = Some(slot);
                Ok(slot)
            }
            Err(e) => {
                log::error!("Capture commit failed: {}", e);
                self.state = CollectorState::Error;
                self.last_error = Some(e.clone());
                Err(e.into())
            }
        }
    }

    /// Abandon an in-progress capture. Nothing is written.
    pub fn cancel(&mut self) -> Result<(), CollectError> {
        match self.state {
            CollectorState::Preparing | CollectorState::Collecting => {
                log::info!("Capture cancelled after {} samples", self.raw.len());
                self.raw = Vec::new();
                self.derived = None;
                self.target = 0;
                self.state = CollectorState::Idle;
                Ok(())
            }
            other => Err(CollectError::InvalidState(other)),
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn is_collecting(&self) -> bool {
        self.state == CollectorState::Collecting
    }

    pub fn is_complete(&self) -> bool {
        self.state == CollectorState::Complete
    }

    pub fn wants_derived(&self) -> bool {
        self.derived.is_some()
    }

    pub fn samples_collected(&self) -> usize {
        self.raw.len()
    }

    pub fn target_samples(&self) -> usize {
        self.target
    }

    pub fn last_slot(&self) -> Option<usize> {
        self.last_slot
    }

    pub fn last_error(&self) -> Option<&StoreError> {
        self.last_error.as_ref()
    }

    /// Completion percentage, 0–100.
    pub fn progress(&self) -> u8 {
        match self.state {
            CollectorState::Collecting if self.target > 0 => {
                (self.raw.len() * 100 / self.target).min(100) as u8
            }
            CollectorState::WritingStore | CollectorState::Complete => 100,
            _ => 0,
        }
    }
}
