// VoltWatch — Hardware & System Configuration
// Target: Seeed Studio Xiao ESP32-C3 (RISC-V)
//
// The constants below describe the reference board. The core never reads
// them directly: they only seed the `Default` impls of the config structs at
// the bottom of this file, which are passed into each component.

// ---------------------------------------------------------------------------
// Converter input (Xiao ESP32-C3 pinout)
// ---------------------------------------------------------------------------
pub const PIN_SENSE_ADC: u32 = 2;   // D0/A0 — Divided battery/bus voltage
pub const ADC_CHANNEL: u32 = 2;     // ADC1_CHANNEL_2 (GPIO2)
pub const ADC_BITS: u32 = 12;
pub const ADC_MAX: u16 = (1 << ADC_BITS) - 1; // 4095

// ---------------------------------------------------------------------------
// Sampling & ping-pong buffers
// ---------------------------------------------------------------------------
pub const SAMPLE_RATE_HZ: u32 = 5000;
pub const SAMPLE_PERIOD_US: u32 = 1_000_000 / SAMPLE_RATE_HZ; // 200 µs
pub const BUFFER_LEN: usize = 512;                             // ~102 ms per buffer

// ---------------------------------------------------------------------------
// Signal conditioning
// ---------------------------------------------------------------------------
pub const DESPIKE_WINDOW: usize = 5; // 1 ms @ 5 kHz

// First-order low-pass, 100 Hz design @ 5 kHz. B1 is stored negative and is
// subtracted in the difference equation.
pub const LPF_CUTOFF_HZ: f32 = 100.0;
pub const LPF_A0: f32 = 0.067_455_27;
pub const LPF_A1: f32 = 0.067_455_27;
pub const LPF_B1: f32 = -0.865_089_46;

// ---------------------------------------------------------------------------
// Calibration (rev B front end: 28k/10k divider, 11.1 V pack → 3.3 V max)
// ---------------------------------------------------------------------------
pub const ADC_VREF: f32 = 3.3;
pub const VDIV_R1: f32 = 28_000.0;
pub const VDIV_R2: f32 = 10_000.0;
pub const VDIV_RATIO: f32 = (VDIV_R1 + VDIV_R2) / VDIV_R2; // 3.8
pub const VOLTAGE_OFFSET: f32 = 0.0;

// ---------------------------------------------------------------------------
// Capture storage (flash partition "captures", see partitions.csv)
// ---------------------------------------------------------------------------
pub const CAPTURE_PARTITION: &core::ffi::CStr = c"captures";
pub const CAPTURE_SLOT_SIZE: usize = 256 * 1024; // header + 2 × ~13 s @ 5 kHz
pub const MAX_CAPTURES: usize = 8;
pub const FLASH_ERASE_SIZE: usize = 4096;
pub const FLASH_PROGRAM_SIZE: usize = 256;

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------
pub const COLLECT_MIN_SECS: u32 = 1;
pub const COLLECT_MAX_SECS: u32 = 60;

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_ACQUISITION: usize = 8192;
pub const STACK_PRESENTATION: usize = 6144;

// ---------------------------------------------------------------------------
// Timing (milliseconds)
// ---------------------------------------------------------------------------
pub const ACQ_IDLE_POLL_MS: u64 = 1;          // idle back-off when no buffer is ready
pub const UI_POLL_INTERVAL_MS: u64 = 50;      // presentation refresh
pub const STATUS_LOG_INTERVAL_MS: u32 = 1000; // presentation status line
pub const WATCHDOG_TIMEOUT_MS: u32 = 2000;

// ---------------------------------------------------------------------------
// Typed configuration handed to the core
// ---------------------------------------------------------------------------

/// Timer + converter setup for the acquisition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub sample_rate_hz: u32,
    pub buffer_len: usize,
    pub channel: u32,
}

impl AcquisitionConfig {
    /// Trigger period in microseconds.
    pub fn period_us(&self) -> u32 {
        1_000_000 / self.sample_rate_hz.max(1)
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: SAMPLE_RATE_HZ,
            buffer_len: BUFFER_LEN,
            channel: ADC_CHANNEL,
        }
    }
}

/// Coefficients of the first-order smoothing stage.
///
/// `y = a0·x + a1·x[n-1] − b1·y[n-1]`; `b1` is applied with the sign it is
/// stored with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub a0: f32,
    pub a1: f32,
    pub b1: f32,
}

impl FilterConfig {
    /// Bilinear-transform Butterworth low-pass for `cutoff_hz` at `sample_rate_hz`.
    pub fn butterworth(cutoff_hz: f32, sample_rate_hz: f32) -> Self {
        let k = (core::f32::consts::PI * cutoff_hz / sample_rate_hz).tan();
        let a0 = k / (1.0 + k);
        Self {
            a0,
            a1: a0,
            b1: (k - 1.0) / (k + 1.0),
        }
    }

    /// Pole of the recursion; the step error shrinks by this factor per sample.
    pub fn pole(&self) -> f32 {
        -self.b1
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            a0: LPF_A0,
            a1: LPF_A1,
            b1: LPF_B1,
        }
    }
}

/// Converter-count to volts scaling. Differs per board revision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub vref: f32,
    pub adc_max: u16,
    pub divider_ratio: f32,
    pub offset: f32,
}

impl Calibration {
    /// Input voltage for a (conditioned) converter value.
    pub fn volts(&self, counts: f32) -> f32 {
        counts / f32::from(self.adc_max) * self.vref * self.divider_ratio + self.offset
    }

    /// Clamp and round a conditioned value back into the converter's range.
    pub fn to_sample(&self, value: f32) -> u16 {
        value.round().clamp(0.0, f32::from(self.adc_max)) as u16
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            vref: ADC_VREF,
            adc_max: ADC_MAX,
            divider_ratio: VDIV_RATIO,
            offset: VOLTAGE_OFFSET,
        }
    }
}

/// Geometry of the capture region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig {
    pub slot_size: usize,
    pub max_slots: usize,
    pub sample_rate_hz: u32,
}

impl StorageConfig {
    pub fn region_size(&self) -> usize {
        self.slot_size * self.max_slots
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            slot_size: CAPTURE_SLOT_SIZE,
            max_slots: MAX_CAPTURES,
            sample_rate_hz: SAMPLE_RATE_HZ,
        }
    }
}
