// VoltWatch — Peer Lockout
//
// Erasing or programming flash stalls instruction fetch from it, so the peer
// execution context must be fully parked for the duration, not just kept out
// of a data structure. The peer cooperates by calling `checkpoint()` once per
// loop iteration; `pause()` blocks until it is parked there.
//
// The context that calls `pause()` must never be the registered victim.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    victim: bool,
    requested: bool,
    parked: bool,
    pauses: u32,
}

#[derive(Debug, Default)]
pub struct Lockout {
    state: Mutex<State>,
    cond: Condvar,
}

impl Lockout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the peer context. Only one victim may exist at a time.
    pub fn victim(self: &Arc<Self>) -> Option<LockoutVictim> {
        let mut st = self.state();
        if st.victim {
            return None;
        }
        st.victim = true;
        Some(LockoutVictim {
            lockout: Arc::clone(self),
        })
    }

    /// Park the peer and hold it until the returned guard drops. Returns
    /// immediately when no peer is registered.
    pub fn pause(&self) -> LockoutGuard<'_> {
        let mut st = self.state();
        st.requested = true;
        st.pauses += 1;
        while st.victim && !st.parked {
            st = self.cond.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
        log::debug!("Peer parked");
        LockoutGuard { lockout: self }
    }

    /// Whether the peer is currently parked.
    pub fn is_paused(&self) -> bool {
        self.state().parked
    }

    /// Total pauses requested so far.
    pub fn pause_count(&self) -> u32 {
        self.state().pauses
    }
}

/// Held by the pausing context; dropping it lets the peer run again.
pub struct LockoutGuard<'a> {
    lockout: &'a Lockout,
}

impl Drop for LockoutGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.lockout.state();
        st.requested = false;
        drop(st);
        self.lockout.cond.notify_all();
        log::debug!("Peer released");
    }
}

/// The peer's half. Dropping it unregisters the peer.
pub struct LockoutVictim {
    lockout: Arc<Lockout>,
}

impl LockoutVictim {
    /// Park here while a pause is in progress. Cheap when there is none.
    pub fn checkpoint(&self) {
        let mut st = self.lockout.state();
        if !st.requested {
            return;
        }
        st.parked = true;
        self.lockout.cond.notify_all();
        while st.requested {
            st = self
                .lockout
                .cond
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
        st.parked = false;
    }
}

impl Drop for LockoutVictim {
    fn drop(&mut self) {
        let mut st = self.lockout.state();
        st.victim = false;
        st.parked = false;
        drop(st);
        self.lockout.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pause_without_victim_returns_immediately() {
        let lockout = Lockout::new();
        let guard = lockout.pause();
        drop(guard);
        assert_eq!(lockout.pause_count(), 1);
    }

    #[test]
    fn only_one_victim() {
        let lockout = Lockout::new();
        let v = lockout.victim().unwrap();
        assert!(lockout.victim().is_none());
        drop(v);
        assert!(lockout.victim().is_some());
    }

    #[test]
    fn peer_makes_no_progress_while_paused() {
        let lockout = Lockout::new();
        let victim = lockout.victim().unwrap();
        let progress = Arc::new(AtomicU32::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let peer = {
            let progress = Arc::clone(&progress);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    victim.checkpoint();
                    progress.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        thread::sleep(Duration::from_millis(10));
        {
            let _guard = lockout.pause();
            assert!(lockout.is_paused());
            let frozen = progress.load(Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            assert_eq!(progress.load(Ordering::SeqCst), frozen);
        }
        thread::sleep(Duration::from_millis(10));
        stop.store(true, Ordering::SeqCst);
        peer.join().unwrap();
        assert!(!lockout.is_paused());
    }
}
