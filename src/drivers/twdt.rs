// VoltWatch — Task Watchdog (ESP32-C3)
//
// The IDF task watchdog is started by the bootloader config. Each fed loop
// subscribes itself; feeding resets the calling task's entry. Suspending
// reconfigures the timer with panic disabled and a timeout no flash
// operation reaches, which is as close to "off" as the TWDT allows while
// tasks are subscribed.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::watchdog::Watchdog;

const SUSPENDED_TIMEOUT_MS: u32 = 60_000;

pub struct TaskWatchdog {
    timeout_ms: u32,
    enabled: AtomicBool,
}

impl TaskWatchdog {
    pub fn new(timeout_ms: u32) -> Self {
        let wd = Self {
            timeout_ms,
            enabled: AtomicBool::new(true),
        };
        wd.configure(timeout_ms, true);
        wd
    }

    fn configure(&self, timeout_ms: u32, panic: bool) {
        let cfg = esp_idf_sys::esp_task_wdt_config_t {
            timeout_ms,
            idle_core_mask: 0,
            trigger_panic: panic,
        };
        let ret = unsafe { esp_idf_sys::esp_task_wdt_reconfigure(&cfg) };
        if ret != esp_idf_sys::ESP_OK {
            log::error!("TWDT reconfigure failed ({})", ret);
        }
    }
}

impl Watchdog for TaskWatchdog {
    fn register(&self) {
        let ret = unsafe { esp_idf_sys::esp_task_wdt_add(core::ptr::null_mut()) };
        if ret != esp_idf_sys::ESP_OK {
            log::error!("TWDT subscribe failed ({})", ret);
        }
    }

    fn feed(&self) {
        unsafe {
            esp_idf_sys::esp_task_wdt_reset();
        }
    }

    fn suspend(&self) -> bool {
        let was = self.enabled.swap(false, Ordering::SeqCst);
        if was {
            self.configure(SUSPENDED_TIMEOUT_MS, false);
        }
        was
    }

    fn resume(&self) {
        self.configure(self.timeout_ms, true);
        self.enabled.store(true, Ordering::SeqCst);
        self.feed();
    }
}
