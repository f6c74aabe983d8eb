// VoltWatch — Error Types
//
// One enum per component. Overflow and lock contention are deliberately not
// represented here: both are counted or skipped, never raised.

use thiserror::Error;

/// Failures of the durable medium itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("range {offset:#x}+{len:#x} outside region of {size:#x} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("range {offset:#x}+{len:#x} not aligned to {granularity} bytes")]
    Misaligned {
        offset: usize,
        len: usize,
        granularity: usize,
    },

    #[error("flash device error: {0}")]
    Device(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The transfer/converter resource could not be claimed. Fatal.
    #[error("converter resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("acquisition engine not initialised")]
    NotInitialized,

    #[error("converter error: {0}")]
    Converter(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Storage region unreachable or inconsistent with the slot geometry. Fatal.
    #[error("capture region misconfigured: {0}")]
    Configuration(String),

    #[error("no free capture slot (max {max_slots})")]
    CapacityExhausted { max_slots: usize },

    #[error("checksum mismatch in slot {slot} ({channel}): stored {stored:#010x}, computed {computed:#010x}")]
    IntegrityFailure {
        slot: usize,
        channel: &'static str,
        stored: u32,
        computed: u32,
    },

    #[error("malformed header in slot {slot}: {reason}")]
    MalformedHeader { slot: usize, reason: &'static str },

    #[error("failed to allocate {bytes} bytes for the capture image")]
    AllocationFailure { bytes: usize },

    #[error("slot {slot} out of range (max {max_slots})")]
    InvalidSlot { slot: usize, max_slots: usize },

    #[error("capture of {needed} bytes does not fit a {slot_size}-byte slot")]
    PayloadTooLarge { needed: usize, slot_size: usize },

    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    #[error(transparent)]
    Flash(#[from] FlashError),
}

impl StoreError {
    /// Checksum or header damage: the slot must be treated as unusable.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            StoreError::IntegrityFailure { .. } | StoreError::MalformedHeader { .. }
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectError {
    #[error("failed to allocate {samples} samples of working memory")]
    AllocationFailure { samples: usize },

    #[error("operation not valid in state {0:?}")]
    InvalidState(crate::events::CollectorState),

    #[error("invalid collection duration: {0} ms")]
    InvalidDuration(u64),

    #[error("capture commit failed: {0}")]
    Store(#[from] StoreError),
}

/// Rejections of host-facing commands.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("duration {seconds} s outside {min}–{max} s")]
    InvalidDuration { seconds: u32, min: u32, max: u32 },

    #[error("{seconds} s does not fit a capture slot (max {max_seconds} s)")]
    ExceedsSlot { seconds: u32, max_seconds: u32 },

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("acquisition context is not running")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectorState;

    #[test]
    fn store_failures_surface_through_commands() {
        let full = StoreError::CapacityExhausted { max_slots: 8 };
        let via_collect = CommandError::from(CollectError::from(full.clone()));
        assert_eq!(via_collect, CommandError::Collect(CollectError::Store(full.clone())));
        assert_eq!(CommandError::from(full.clone()).to_string(), full.to_string());
        assert_eq!(
            via_collect.to_string(),
            "capture commit failed: no free capture slot (max 8)"
        );
    }

    #[test]
    fn integrity_classification() {
        let damaged = StoreError::MalformedHeader {
            slot: 1,
            reason: "sample count exceeds slot",
        };
        assert!(damaged.is_integrity());
        assert!(!StoreError::InvalidSlot { slot: 9, max_slots: 8 }.is_integrity());
        assert_eq!(
            CollectError::InvalidState(CollectorState::Idle).to_string(),
            "operation not valid in state Idle"
        );
    }
}
