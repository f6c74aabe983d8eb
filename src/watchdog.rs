// VoltWatch — Watchdog
//
// Both long-running contexts feed the watchdog every iteration. Flash
// operations can outlast the timeout, so the store suspends it around the
// erase/program span and resumes it afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub trait Watchdog: Send + Sync {
    /// Subscribe the calling context, for timers that watch each task
    /// separately. Call once at the top of every fed loop.
    fn register(&self) {}

    fn feed(&self);

    /// Stop the timer. Returns whether it was running before the call.
    fn suspend(&self) -> bool;

    /// Restart the timer with a fresh timeout.
    fn resume(&self);
}

impl<W: Watchdog + ?Sized> Watchdog for Arc<W> {
    fn register(&self) {
        (**self).register()
    }

    fn feed(&self) {
        (**self).feed()
    }

    fn suspend(&self) -> bool {
        (**self).suspend()
    }

    fn resume(&self) {
        (**self).resume()
    }
}

#[derive(Debug)]
struct SoftState {
    enabled: bool,
    last_feed: Instant,
    suspends: u32,
    resumes: u32,
}

/// Software watchdog for hosted builds: tracks feeds and reports expiry
/// instead of resetting the machine.
#[derive(Debug)]
pub struct SoftWatchdog {
    timeout: Duration,
    state: Mutex<SoftState>,
}

impl SoftWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(SoftState {
                enabled: true,
                last_feed: Instant::now(),
                suspends: 0,
                resumes: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SoftState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enabled and not fed within the timeout.
    pub fn expired(&self) -> bool {
        let st = self.state();
        st.enabled && st.last_feed.elapsed() > self.timeout
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// (suspend calls, resume calls)
    pub fn bracket_counts(&self) -> (u32, u32) {
        let st = self.state();
        (st.suspends, st.resumes)
    }
}

impl Watchdog for SoftWatchdog {
    fn feed(&self) {
        self.state().last_feed = Instant::now();
    }

    fn suspend(&self) -> bool {
        let mut st = self.state();
        let was = st.enabled;
        st.enabled = false;
        st.suspends += 1;
        was
    }

    fn resume(&self) {
        let mut st = self.state();
        st.enabled = true;
        st.last_feed = Instant::now();
        st.resumes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_without_feed() {
        let wd = SoftWatchdog::new(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(15));
        assert!(wd.expired());
        wd.feed();
        assert!(!wd.expired());
    }

    #[test]
    fn suspended_watchdog_never_expires() {
        let wd = SoftWatchdog::new(Duration::from_millis(1));
        assert!(wd.suspend());
        std::thread::sleep(Duration::from_millis(5));
        assert!(!wd.expired());
        assert!(!wd.suspend());
        wd.resume();
        assert!(wd.is_enabled());
        assert_eq!(wd.bracket_counts(), (2, 1));
    }
}
