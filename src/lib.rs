// VoltWatch — Core Library
//
// Everything that does not touch a specific peripheral lives here so it runs
// on the build host as well as on the device. Peripheral bindings sit behind
// the `Converter`, `FlashRegion` and `Watchdog` traits; `drivers` provides
// the ESP-IDF implementations on device and simulated ones elsewhere.

pub mod acquisition;
pub mod collector;
pub mod commands;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod filter;
pub mod lockout;
pub mod shared;
pub mod storage;
pub mod tasks;
pub mod watchdog;

// Provides the `critical-section` implementation the ping-pong flags rely on.
#[cfg(target_os = "espidf")]
use esp_idf_hal as _;

// ---------------------------------------------------------------------------
// Utility: milliseconds since boot (wraps at ~49 days — fine for timestamps)
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
pub fn now_ms() -> u32 {
    unsafe { (esp_idf_sys::esp_timer_get_time() / 1000) as u32 }
}

/// Milliseconds since the first call in this process.
#[cfg(not(target_os = "espidf"))]
pub fn now_ms() -> u32 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static BOOT: OnceLock<Instant> = OnceLock::new();
    BOOT.get_or_init(Instant::now).elapsed().as_millis() as u32
}
