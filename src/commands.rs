// VoltWatch — Host Command Surface
//
// Typed requests from the host-facing control channel (the wire parser lives
// elsewhere). The acquisition context owns the store, so requests are queued
// to it and drained without blocking once per loop iteration; each request
// carries its own reply channel.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use crate::collector::CollectionController;
use crate::config::{COLLECT_MAX_SECS, COLLECT_MIN_SECS};
use crate::error::CommandError;
use crate::events::CollectorState;
use crate::storage::{CaptureStore, FlashRegion, SlotInfo, StoreStats};
use crate::watchdog::Watchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Capture `seconds` of raw and filtered samples.
    Collect { seconds: u32 },
    Cancel,
    Status,
    List,
    Fetch { slot: usize },
    Delete { slot: usize },
    DeleteAll,
    Stats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Started { target_samples: usize },
    Cancelled,
    Status {
        state: CollectorState,
        progress: u8,
        samples: usize,
        target: usize,
        last_slot: Option<usize>,
    },
    Slots(Vec<SlotInfo>),
    /// Header and payload exactly as stored; `None` for an empty slot.
    Capture { slot: usize, bytes: Option<Vec<u8>> },
    Deleted { slot: Option<usize> },
    Stats(StoreStats),
    Failed(CommandError),
}

pub struct Request {
    pub command: Command,
    reply: Sender<Response>,
}

impl Request {
    pub fn respond(self, response: Response) {
        // The requester may have given up waiting.
        let _ = self.reply.send(response);
    }
}

pub fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel();
    (CommandSender { tx }, CommandReceiver { rx })
}

#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Request>,
}

impl CommandSender {
    /// Queue a command; the returned receiver yields its response.
    pub fn submit(&self, command: Command) -> Result<Receiver<Response>, CommandError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Request { command, reply })
            .map_err(|_| CommandError::Disconnected)?;
        Ok(rx)
    }

    /// Queue a command and wait up to `timeout` for its response.
    pub fn call(&self, command: Command, timeout: Duration) -> Result<Response, CommandError> {
        let rx = self.submit(command)?;
        match rx.recv_timeout(timeout) {
            Ok(r) => Ok(r),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(CommandError::Disconnected)
            }
        }
    }
}

pub struct CommandReceiver {
    rx: Receiver<Request>,
}

impl CommandReceiver {
    /// Next queued request, without waiting.
    pub fn try_next(&self) -> Option<Request> {
        match self.rx.try_recv() {
            Ok(req) => Some(req),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Run one command against the collector and the store it feeds.
pub fn execute<F: FlashRegion, W: Watchdog>(
    collector: &mut CollectionController<CaptureStore<F, W>>,
    command: Command,
) -> Response {
    match run(collector, command) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Command {:?} rejected: {}", command, e);
            Response::Failed(e)
        }
    }
}

fn run<F: FlashRegion, W: Watchdog>(
    collector: &mut CollectionController<CaptureStore<F, W>>,
    command: Command,
) -> Result<Response, CommandError> {
    match command {
        Command::Collect { seconds } => {
            if !(COLLECT_MIN_SECS..=COLLECT_MAX_SECS).contains(&seconds) {
                return Err(CommandError::InvalidDuration {
                    seconds,
                    min: COLLECT_MIN_SECS,
                    max: COLLECT_MAX_SECS,
                });
            }
            let store = collector.sink();
            let rate = store.config().sample_rate_hz.max(1);
            let max_samples = store.max_samples(true);
            if u64::from(seconds) * u64::from(rate) > max_samples as u64 {
                return Err(CommandError::ExceedsSlot {
                    seconds,
                    max_seconds: (max_samples / rate as usize) as u32,
                });
            }
            collector.start(Duration::from_secs(u64::from(seconds)), true)?;
            Ok(Response::Started {
                target_samples: collector.target_samples(),
            })
        }
        Command::Cancel => {
            collector.cancel()?;
            Ok(Response::Cancelled)
        }
        Command::Status => Ok(Response::Status {
            state: collector.state(),
            progress: collector.progress(),
            samples: collector.samples_collected(),
            target: collector.target_samples(),
            last_slot: collector.last_slot(),
        }),
        Command::List => Ok(Response::Slots(collector.sink().list()?)),
        Command::Fetch { slot } => {
            let bytes = collector.sink().fetch(slot)?.map(<[u8]>::to_vec);
            Ok(Response::Capture { slot, bytes })
        }
        Command::Delete { slot } => {
            ensure_idle(collector)?;
            collector.sink_mut().delete(slot)?;
            Ok(Response::Deleted { slot: Some(slot) })
        }
        Command::DeleteAll => {
            ensure_idle(collector)?;
            collector.sink_mut().delete_all()?;
            Ok(Response::Deleted { slot: None })
        }
        Command::Stats => Ok(Response::Stats(collector.sink().stats()?)),
    }
}

/// Erasing under a running capture would race its commit for the slot.
fn ensure_idle<S: crate::collector::CaptureSink>(
    collector: &CollectionController<S>,
) -> Result<(), CommandError> {
    match collector.state() {
        CollectorState::Preparing | CollectorState::Collecting | CollectorState::WritingStore => Err(
            CommandError::Collect(crate::error::CollectError::InvalidState(collector.state())),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::lockout::Lockout;
    use crate::storage::RamFlash;
    use crate::watchdog::SoftWatchdog;

    type Ctl = CollectionController<CaptureStore<RamFlash, SoftWatchdog>>;

    fn controller(slot_size: usize) -> Ctl {
        let cfg = StorageConfig {
            slot_size,
            max_slots: 2,
            sample_rate_hz: 100,
        };
        let store = CaptureStore::new(
            RamFlash::new(cfg.region_size(), 4096, 256),
            SoftWatchdog::new(Duration::from_secs(2)),
            Lockout::new(),
            cfg,
        );
        CollectionController::new(store, cfg.sample_rate_hz)
    }

    #[test]
    fn collect_validates_duration() {
        let mut c = controller(8192);
        for seconds in [0, 61] {
            assert!(matches!(
                execute(&mut c, Command::Collect { seconds }),
                Response::Failed(CommandError::InvalidDuration { .. })
            ));
        }
        assert_eq!(c.state(), CollectorState::Idle);
    }

    #[test]
    fn collect_checks_slot_capacity() {
        // (4096 - 32) / 4 = 1016 two-channel samples = 10 s at 100 Hz.
        let mut c = controller(4096);
        assert_eq!(
            execute(&mut c, Command::Collect { seconds: 11 }),
            Response::Failed(CommandError::ExceedsSlot {
                seconds: 11,
                max_seconds: 10
            })
        );
        assert_eq!(
            execute(&mut c, Command::Collect { seconds: 10 }),
            Response::Started { target_samples: 1000 }
        );
    }

    #[test]
    fn collect_list_fetch_delete() {
        let mut c = controller(8192);
        execute(&mut c, Command::Collect { seconds: 1 });
        c.ingest(&[7; 100], Some(&[9; 100][..]), 100).unwrap();

        let Response::Slots(slots) = execute(&mut c, Command::List) else {
            panic!("expected slot list");
        };
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].sample_count, 100);
        assert!(slots[0].has_derived);

        let Response::Capture { bytes: Some(bytes), .. } = execute(&mut c, Command::Fetch { slot: 0 })
        else {
            panic!("expected capture bytes");
        };
        assert_eq!(bytes.len(), 32 + 400);

        assert_eq!(
            execute(&mut c, Command::Delete { slot: 0 }),
            Response::Deleted { slot: Some(0) }
        );
        assert_eq!(execute(&mut c, Command::List), Response::Slots(vec![]));
    }

    #[test]
    fn delete_refused_while_collecting() {
        let mut c = controller(8192);
        execute(&mut c, Command::Collect { seconds: 1 });
        assert!(matches!(
            execute(&mut c, Command::DeleteAll),
            Response::Failed(CommandError::Collect(_))
        ));
        assert_eq!(execute(&mut c, Command::Cancel), Response::Cancelled);
    }

    #[test]
    fn requests_carry_their_reply() {
        let (tx, rx) = channel();
        let pending = tx.submit(Command::Stats).unwrap();
        let req = rx.try_next().unwrap();
        assert_eq!(req.command, Command::Stats);
        req.respond(Response::Cancelled);
        assert_eq!(pending.recv().unwrap(), Response::Cancelled);
        assert!(rx.try_next().is_none());

        drop(rx);
        assert_eq!(tx.submit(Command::List).unwrap_err(), CommandError::Disconnected);
    }
}
