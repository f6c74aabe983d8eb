// VoltWatch — Cross-Context Metrics Channel
//
// Single producer (acquisition context), single consumer (presentation
// context). Both sides use try-lock only: the producer skips a cycle when the
// consumer holds the record, the consumer skips a refresh when the producer
// does. A separate heartbeat counter is bumped every producer cycle whatever
// the lock outcome, so the consumer can tell "stale" from "stalled".

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use crate::events::SharedMetrics;

struct Shared {
    record: Mutex<SharedMetrics>,
    heartbeat: AtomicU32,
    skipped: AtomicU32,
}

/// Create the producer/consumer pair. Neither half is `Clone`.
pub fn channel() -> (MetricsProducer, MetricsConsumer) {
    let shared = Arc::new(Shared {
        record: Mutex::new(SharedMetrics::default()),
        heartbeat: AtomicU32::new(0),
        skipped: AtomicU32::new(0),
    });
    (
        MetricsProducer {
            shared: Arc::clone(&shared),
        },
        MetricsConsumer { shared },
    )
}

pub struct MetricsProducer {
    shared: Arc<Shared>,
}

impl MetricsProducer {
    /// Bump the liveness counter. Call once per loop iteration, unconditionally.
    pub fn beat(&self) {
        self.shared.heartbeat.fetch_add(1, Ordering::Relaxed);
    }

    /// Overwrite the shared record with `metrics` and mark it fresh.
    ///
    /// Returns `false` (and leaves the record untouched) if the consumer holds
    /// the lock. Never waits.
    pub fn try_publish(&self, metrics: &SharedMetrics) -> bool {
        let mut guard = match self.shared.record.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => {
                self.shared.skipped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        *guard = SharedMetrics {
            fresh: true,
            ..*metrics
        };
        true
    }

    /// Publishes dropped because of contention.
    pub fn skipped(&self) -> u32 {
        self.shared.skipped.load(Ordering::Relaxed)
    }
}

/// A copy of the record plus whether it was new since the previous read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub metrics: SharedMetrics,
    pub fresh: bool,
}

pub struct MetricsConsumer {
    shared: Arc<Shared>,
}

impl MetricsConsumer {
    /// Copy the record out and clear its freshness flag. `None` if the
    /// producer holds the lock right now.
    pub fn try_snapshot(&self) -> Option<Snapshot> {
        let mut guard = match self.shared.record.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => return None,
        };
        let metrics = *guard;
        guard.fresh = false;
        Some(Snapshot {
            fresh: metrics.fresh,
            metrics,
        })
    }

    /// Producer liveness counter; read without the lock.
    pub fn heartbeat(&self) -> u32 {
        self.shared.heartbeat.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn hold(&self) -> std::sync::MutexGuard<'_, SharedMetrics> {
        self.shared.record.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectorState;

    #[test]
    fn publish_then_snapshot_clears_fresh() {
        let (tx, rx) = channel();
        let m = SharedMetrics {
            average_volts: 11.1,
            buffer_count: 3,
            collector_state: CollectorState::Collecting,
            ..Default::default()
        };
        assert!(tx.try_publish(&m));

        let snap = rx.try_snapshot().unwrap();
        assert!(snap.fresh);
        assert_eq!(snap.metrics.buffer_count, 3);

        let again = rx.try_snapshot().unwrap();
        assert!(!again.fresh);
        assert_eq!(again.metrics.buffer_count, 3);
    }

    #[test]
    fn contended_publish_is_skipped_not_blocked() {
        let (tx, rx) = channel();
        let held = rx.hold();
        assert!(!tx.try_publish(&SharedMetrics {
            buffer_count: 9,
            ..Default::default()
        }));
        tx.beat();
        drop(held);

        assert_eq!(tx.skipped(), 1);
        assert_eq!(rx.heartbeat(), 1);
        let snap = rx.try_snapshot().unwrap();
        assert!(!snap.fresh);
        assert_eq!(snap.metrics.buffer_count, 0);
    }

    #[test]
    fn heartbeat_advances_without_publishing() {
        let (tx, rx) = channel();
        for _ in 0..5 {
            tx.beat();
        }
        assert_eq!(rx.heartbeat(), 5);
        assert!(!rx.try_snapshot().unwrap().fresh);
    }

    #[test]
    fn producer_cannot_clear_fresh() {
        let (tx, rx) = channel();
        let stale = SharedMetrics {
            fresh: false,
            ..Default::default()
        };
        tx.try_publish(&stale);
        assert!(rx.try_snapshot().unwrap().fresh);
    }
}
