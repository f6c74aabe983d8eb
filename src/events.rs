// VoltWatch — Shared Data Types
//
// Values that cross from the acquisition context to the presentation context
// (and to the host-facing control surface).

// ---------------------------------------------------------------------------
// Collection session state
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectorState {
    #[default]
    Idle,
    Preparing,
    Collecting,
    WritingStore,
    Complete,
    Error,
}

impl CollectorState {
    /// Short label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Collecting => "collecting",
            Self::WritingStore => "writing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate record published every acquisition cycle
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SharedMetrics {
    /// Mean conditioned value of the last buffer, in volts.
    pub average_volts: f32,
    /// Last raw converter sample.
    pub raw_sample: u16,
    /// Last conditioned sample, rounded back to converter counts.
    pub derived_sample: u16,
    /// Buffers completed by the acquisition engine.
    pub buffer_count: u32,
    /// Buffers lost because the consumer fell behind.
    pub overflow_count: u32,
    /// Samples run through the conditioning pipeline.
    pub samples_processed: u64,
    /// Producer loop iterations at the time of publication.
    pub loop_count: u32,
    pub collector_state: CollectorState,
    /// Capture progress, 0–100.
    pub capture_progress: u8,
    /// Slot of the last successful capture.
    pub last_slot: Option<usize>,
    /// Set by the producer on every publish, cleared by the consumer on read.
    pub fresh: bool,
}
