// VoltWatch — Capture Store
//
// A bounded number of fixed-size slots in a flash partition. Each slot holds
// one capture: a header followed by one or two equal-length u16 payloads.
// Slots are written only by a single erase-then-program commit and are
// assumed to be filled contiguously from slot 0.
//
// Every erase/program is bracketed by a watchdog suspend and a full pause of
// the peer context, and nothing else happens inside that bracket.

pub mod flash;
pub mod format;

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::lockout::{Lockout, LockoutGuard};
use crate::watchdog::Watchdog;

pub use flash::{FlashRegion, RamFlash};
pub use format::{CaptureHeader, DecodeError, MAGIC};

use format::{checksum, checksum_samples, DecodeError as Decode, HEADER_LEN_V2, SAMPLE_BYTES};

/// One line of the slot listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub index: usize,
    pub sample_count: u32,
    pub timestamp: u32,
    pub version: u32,
    pub has_derived: bool,
}

/// Region usage summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total_bytes: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub capture_count: usize,
}

/// Little-endian u16 samples viewed in place.
#[derive(Debug, Clone, Copy)]
pub struct SampleView<'a> {
    bytes: &'a [u8],
}

impl<'a> SampleView<'a> {
    pub fn len(&self) -> usize {
        self.bytes.len() / SAMPLE_BYTES
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        let b = self.bytes.get(index * SAMPLE_BYTES..index * SAMPLE_BYTES + SAMPLE_BYTES)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + 'a {
        self.bytes
            .chunks_exact(SAMPLE_BYTES)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// A committed capture, borrowed straight from the medium.
#[derive(Debug, Clone, Copy)]
pub struct CaptureView<'a> {
    pub slot: usize,
    pub header: CaptureHeader,
    image: &'a [u8],
}

impl<'a> CaptureView<'a> {
    pub fn raw(&self) -> SampleView<'a> {
        let start = self.header.header_len();
        SampleView {
            bytes: &self.image[start..start + self.header.channel_bytes()],
        }
    }

    pub fn derived(&self) -> Option<SampleView<'a>> {
        if !self.header.has_derived() {
            return None;
        }
        let start = self.header.header_len() + self.header.channel_bytes();
        Some(SampleView {
            bytes: &self.image[start..start + self.header.channel_bytes()],
        })
    }

    /// Header and payload bytes exactly as stored.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.image
    }
}

/// Watchdog suspended + peer parked, undone in reverse order on drop.
struct Quiesced<'a, W: Watchdog> {
    watchdog: &'a W,
    watchdog_was_enabled: bool,
    peer: Option<LockoutGuard<'a>>,
}

impl<'a, W: Watchdog> Quiesced<'a, W> {
    fn enter(watchdog: &'a W, lockout: &'a Lockout) -> Self {
        let watchdog_was_enabled = watchdog.suspend();
        let peer = Some(lockout.pause());
        Self {
            watchdog,
            watchdog_was_enabled,
            peer,
        }
    }
}

impl<W: Watchdog> Drop for Quiesced<'_, W> {
    fn drop(&mut self) {
        self.peer.take();
        if self.watchdog_was_enabled {
            self.watchdog.resume();
        }
    }
}

pub struct CaptureStore<F: FlashRegion, W: Watchdog> {
    flash: F,
    watchdog: W,
    lockout: Arc<Lockout>,
    config: StorageConfig,
}

impl<F: FlashRegion, W: Watchdog> CaptureStore<F, W> {
    pub fn new(flash: F, watchdog: W, lockout: Arc<Lockout>, config: StorageConfig) -> Self {
        Self {
            flash,
            watchdog,
            lockout,
            config,
        }
    }

    /// Check that the region can hold the configured slots and is readable.
    /// Erases nothing.
    pub fn init(&self) -> Result<(), StoreError> {
        let cfg = &self.config;
        if cfg.max_slots == 0 || cfg.slot_size < HEADER_LEN_V2 {
            return Err(StoreError::Configuration(format!(
                "{} slots of {} bytes",
                cfg.max_slots, cfg.slot_size
            )));
        }
        let erase = self.flash.erase_size();
        let program = self.flash.program_size();
        if erase == 0 || cfg.slot_size % erase != 0 {
            return Err(StoreError::Configuration(format!(
                "slot size {} is not a multiple of the {}-byte erase sector",
                cfg.slot_size, erase
            )));
        }
        if program == 0 || erase % program != 0 {
            return Err(StoreError::Configuration(format!(
                "program size {program} does not divide erase size {erase}"
            )));
        }
        if cfg.region_size() > self.flash.size() {
            return Err(StoreError::Configuration(format!(
                "{} bytes of slots exceed the {}-byte region",
                cfg.region_size(),
                self.flash.size()
            )));
        }
        self.flash
            .read(0, 4)
            .map_err(|e| StoreError::Configuration(format!("region unreadable: {e}")))?;

        log::info!(
            "Capture store: {} slots × {} KiB ({} KiB region)",
            cfg.max_slots,
            cfg.slot_size / 1024,
            self.flash.size() / 1024
        );
        Ok(())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Largest per-channel sample count a slot can hold.
    pub fn max_samples(&self, with_derived: bool) -> usize {
        let channels = if with_derived { 2 } else { 1 };
        self.config.slot_size.saturating_sub(HEADER_LEN_V2) / (channels * SAMPLE_BYTES)
    }

    fn slot_offset(&self, slot: usize) -> usize {
        slot * self.config.slot_size
    }

    fn check_slot(&self, slot: usize) -> Result<(), StoreError> {
        if slot >= self.config.max_slots {
            return Err(StoreError::InvalidSlot {
                slot,
                max_slots: self.config.max_slots,
            });
        }
        Ok(())
    }

    fn header_at(&self, slot: usize) -> Result<Result<CaptureHeader, Decode>, StoreError> {
        let bytes = self.flash.read(self.slot_offset(slot), HEADER_LEN_V2)?;
        Ok(CaptureHeader::decode(bytes))
    }

    fn is_occupied(&self, slot: usize) -> Result<bool, StoreError> {
        Ok(!matches!(self.header_at(slot)?, Err(Decode::Empty)))
    }

    /// Single-channel (version 1) commit.
    pub fn commit_raw(&mut self, raw: &[u16], count: usize, timestamp: u32) -> Result<usize, StoreError> {
        self.commit(raw, None, count, timestamp)
    }

    /// Persist `count` samples (plus an optional derived channel of the same
    /// length) into the first free slot. Returns the slot index once the
    /// written image has been read back and its checksums verified.
    ///
    /// On error the chosen slot's contents are indeterminate.
    pub fn commit(
        &mut self,
        raw: &[u16],
        derived: Option<&[u16]>,
        count: usize,
        timestamp: u32,
    ) -> Result<usize, StoreError> {
        if count == 0 {
            return Err(StoreError::InvalidPayload("empty capture"));
        }
        if raw.len() < count || derived.is_some_and(|d| d.len() < count) {
            return Err(StoreError::InvalidPayload("fewer samples than count"));
        }
        let raw = &raw[..count];
        let derived = derived.map(|d| &d[..count]);

        let header = CaptureHeader::new(
            self.config.sample_rate_hz,
            count as u32,
            timestamp,
            checksum_samples(raw),
            derived.map(checksum_samples),
        );
        let needed = header.image_len().unwrap_or(usize::MAX);
        if needed > self.config.slot_size {
            return Err(StoreError::PayloadTooLarge {
                needed,
                slot_size: self.config.slot_size,
            });
        }

        let slot = self.first_free_slot()?.ok_or_else(|| {
            log::warn!("No free capture slot (max {})", self.config.max_slots);
            StoreError::CapacityExhausted {
                max_slots: self.config.max_slots,
            }
        })?;

        let image = self.build_image(&header, needed, raw, derived)?;
        let offset = self.slot_offset(slot);
        let erase_len = round_up(image.len(), self.flash.erase_size());

        log::info!(
            "Writing {} samples{} to slot {} ({} bytes, erase {:#x}+{:#x})",
            count,
            if derived.is_some() { " ×2" } else { "" },
            slot,
            needed,
            offset,
            erase_len
        );

        {
            let _quiet = Quiesced::enter(&self.watchdog, &self.lockout);
            self.flash.erase(offset, erase_len)?;
            self.flash.program(offset, &image)?;
        }

        if let Err(e) = self.verify(slot) {
            log::error!("Verification failed for slot {}: {}", slot, e);
            return Err(e);
        }
        log::info!("Capture committed to slot {}", slot);
        Ok(slot)
    }

    fn first_free_slot(&self) -> Result<Option<usize>, StoreError> {
        for slot in 0..self.config.max_slots {
            if !self.is_occupied(slot)? {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Header + payloads, padded with the erased value to the program size.
    fn build_image(
        &self,
        header: &CaptureHeader,
        image_len: usize,
        raw: &[u16],
        derived: Option<&[u16]>,
    ) -> Result<Vec<u8>, StoreError> {
        let len = round_up(image_len, self.flash.program_size());
        let mut image = Vec::new();
        image
            .try_reserve_exact(len)
            .map_err(|_| StoreError::AllocationFailure { bytes: len })?;

        image.resize(header.header_len(), 0);
        header.encode(&mut image);
        for s in raw.iter().chain(derived.unwrap_or(&[])) {
            image.extend_from_slice(&s.to_le_bytes());
        }
        image.resize(len, 0xFF);
        Ok(image)
    }

    /// Borrow a committed capture in place. `Ok(None)` for an empty slot;
    /// `IntegrityFailure` if a stored checksum does not match its payload.
    pub fn read(&self, slot: usize) -> Result<Option<CaptureView<'_>>, StoreError> {
        self.check_slot(slot)?;
        let header = match self.header_at(slot)? {
            Ok(h) => h,
            Err(Decode::Empty) => return Ok(None),
            Err(Decode::Truncated) => {
                return Err(StoreError::MalformedHeader {
                    slot,
                    reason: "truncated header",
                })
            }
            Err(Decode::UnknownVersion) => {
                return Err(StoreError::MalformedHeader {
                    slot,
                    reason: "unknown version",
                })
            }
            Err(Decode::BadDerivedFlag) => {
                return Err(StoreError::MalformedHeader {
                    slot,
                    reason: "bad derived-channel flag",
                })
            }
        };
        let len = match header.image_len() {
            Some(len) if len <= self.config.slot_size => len,
            _ => {
                return Err(StoreError::MalformedHeader {
                    slot,
                    reason: "sample count exceeds slot",
                })
            }
        };

        let image = self.flash.read(self.slot_offset(slot), len)?;
        let view = CaptureView {
            slot,
            header,
            image,
        };

        let computed = checksum(view.raw().as_bytes());
        if computed != header.checksum {
            return Err(StoreError::IntegrityFailure {
                slot,
                channel: "raw",
                stored: header.checksum,
                computed,
            });
        }
        if let (Some(stored), Some(derived)) = (header.checksum_derived, view.derived()) {
            let computed = checksum(derived.as_bytes());
            if computed != stored {
                return Err(StoreError::IntegrityFailure {
                    slot,
                    channel: "derived",
                    stored,
                    computed,
                });
            }
        }
        Ok(Some(view))
    }

    /// Recompute the checksums of a committed slot. An empty slot fails.
    pub fn verify(&self, slot: usize) -> Result<(), StoreError> {
        match self.read(slot)? {
            Some(_) => Ok(()),
            None => Err(StoreError::MalformedHeader {
                slot,
                reason: "magic mismatch",
            }),
        }
    }

    /// Header + payload bytes of a slot, verbatim.
    pub fn fetch(&self, slot: usize) -> Result<Option<&[u8]>, StoreError> {
        Ok(self.read(slot)?.map(|v| v.as_bytes()))
    }

    /// Erase one slot.
    pub fn delete(&mut self, slot: usize) -> Result<(), StoreError> {
        self.check_slot(slot)?;
        let offset = self.slot_offset(slot);
        log::info!("Deleting slot {} ({:#x}+{:#x})", slot, offset, self.config.slot_size);
        {
            let _quiet = Quiesced::enter(&self.watchdog, &self.lockout);
            self.flash.erase(offset, self.config.slot_size)?;
        }
        Ok(())
    }

    /// Erase every slot.
    pub fn delete_all(&mut self) -> Result<(), StoreError> {
        let len = self.config.region_size();
        log::info!("Deleting all captures ({:#x} bytes)", len);
        {
            let _quiet = Quiesced::enter(&self.watchdog, &self.lockout);
            self.flash.erase(0, len)?;
        }
        Ok(())
    }

    /// Walk slots from 0 and stop at the first one without a valid magic.
    pub fn enumerate(&self) -> Result<Vec<SlotInfo>, StoreError> {
        let mut slots = Vec::new();
        for index in 0..self.config.max_slots {
            let header = match self.header_at(index)? {
                Ok(h) => h,
                Err(Decode::Empty) => break,
                Err(e) => {
                    log::warn!("Slot {} has an unreadable header ({:?})", index, e);
                    break;
                }
            };
            slots.push(SlotInfo {
                index,
                sample_count: header.sample_count,
                timestamp: header.timestamp,
                version: header.version,
                has_derived: header.has_derived(),
            });
        }
        Ok(slots)
    }

    /// Committed captures for the host listing. Same walk as `enumerate`.
    pub fn list(&self) -> Result<Vec<SlotInfo>, StoreError> {
        self.enumerate()
    }

    pub fn capture_count(&self) -> Result<usize, StoreError> {
        Ok(self.enumerate()?.len())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let capture_count = self.capture_count()?;
        let total_bytes = self.config.region_size();
        let used_bytes = capture_count * self.config.slot_size;
        Ok(StoreStats {
            total_bytes,
            used_bytes,
            free_bytes: total_bytes - used_bytes,
            capture_count,
        })
    }
}

fn round_up(len: usize, granularity: usize) -> usize {
    if granularity == 0 {
        return len;
    }
    len.div_ceil(granularity) * granularity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::SoftWatchdog;
    use std::time::Duration;

    type Store = CaptureStore<RamFlash, Arc<SoftWatchdog>>;

    fn store(slots: usize, slot_size: usize) -> (Store, Arc<SoftWatchdog>, Arc<Lockout>) {
        let wd = Arc::new(SoftWatchdog::new(Duration::from_secs(2)));
        let lockout = Lockout::new();
        let cfg = StorageConfig {
            slot_size,
            max_slots: slots,
            sample_rate_hz: 5000,
        };
        let flash = RamFlash::new(slots * slot_size, 4096, 256);
        let s = CaptureStore::new(flash, Arc::clone(&wd), Arc::clone(&lockout), cfg);
        s.init().unwrap();
        (s, wd, lockout)
    }

    fn ramp(n: usize, base: u16) -> Vec<u16> {
        (0..n).map(|i| base.wrapping_add(i as u16)).collect()
    }

    #[test]
    fn raw_round_trip() {
        let (mut s, _, _) = store(4, 8192);
        let raw = ramp(1000, 100);
        let slot = s.commit_raw(&raw, raw.len(), 42).unwrap();
        assert_eq!(slot, 0);

        let view = s.read(0).unwrap().unwrap();
        assert_eq!(view.header.version, 1);
        assert_eq!(view.header.timestamp, 42);
        assert_eq!(view.header.sample_rate, 5000);
        assert!(view.derived().is_none());
        assert_eq!(view.raw().iter().collect::<Vec<_>>(), raw);
        assert_eq!(view.as_bytes().len(), 24 + 2000);
    }

    #[test]
    fn derived_round_trip() {
        let (mut s, _, _) = store(2, 8192);
        let raw = ramp(500, 0);
        let derived = ramp(500, 7000);
        s.commit(&raw, Some(&derived[..]), 500, 7).unwrap();
        let view = s.read(0).unwrap().unwrap();
        assert_eq!(view.header.version, 2);
        assert!(view.header.has_derived());
        let d = view.derived().unwrap();
        assert_eq!(d.len(), 500);
        assert_eq!(d.get(499), Some(7499));
        assert_eq!(d.iter().collect::<Vec<_>>(), derived);
    }

    #[test]
    fn empty_slot_reads_as_absent() {
        let (s, _, _) = store(2, 4096);
        assert!(s.read(1).unwrap().is_none());
        assert!(s.fetch(0).unwrap().is_none());
        assert!(matches!(s.read(2), Err(StoreError::InvalidSlot { .. })));
    }

    #[test]
    fn corrupted_payload_is_integrity_failure() {
        let (mut s, _, _) = store(2, 8192);
        let raw = ramp(100, 1);
        s.commit_raw(&raw, 100, 0).unwrap();
        s.flash_mut().bytes_mut()[24 + 10] ^= 0x01;
        let err = s.read(0).unwrap_err();
        assert!(err.is_integrity(), "{err:?}");
        assert!(s.verify(0).is_err());
    }

    #[test]
    fn count_selects_prefix() {
        let (mut s, _, _) = store(2, 8192);
        let raw = ramp(100, 0);
        s.commit_raw(&raw, 10, 0).unwrap();
        let view = s.read(0).unwrap().unwrap();
        assert_eq!(view.raw().len(), 10);
    }

    #[test]
    fn rejects_bad_payloads() {
        let (mut s, _, _) = store(1, 4096);
        assert!(matches!(
            s.commit_raw(&[], 0, 0),
            Err(StoreError::InvalidPayload(_))
        ));
        assert!(matches!(
            s.commit_raw(&[1, 2], 3, 0),
            Err(StoreError::InvalidPayload(_))
        ));
        assert!(matches!(
            s.commit(&[1, 2], Some(&[1]), 2, 0),
            Err(StoreError::InvalidPayload(_))
        ));
        let big = vec![0u16; 4096];
        assert!(matches!(
            s.commit_raw(&big, big.len(), 0),
            Err(StoreError::PayloadTooLarge { .. })
        ));
        assert_eq!(s.capture_count().unwrap(), 0);
    }

    #[test]
    fn exhaustion_leaves_prior_slots_intact() {
        let (mut s, _, _) = store(3, 4096);
        for i in 0..3u16 {
            assert_eq!(s.commit_raw(&ramp(50, i * 1000), 50, u32::from(i)).unwrap(), usize::from(i));
        }
        let before = s.flash().read(0, 3 * 4096).unwrap().to_vec();
        assert_eq!(
            s.commit_raw(&ramp(50, 9), 50, 9),
            Err(StoreError::CapacityExhausted { max_slots: 3 })
        );
        assert_eq!(s.flash().read(0, 3 * 4096).unwrap(), &before[..]);
        for i in 0..3 {
            assert!(s.read(i).unwrap().is_some());
        }
    }

    #[test]
    fn enumerate_stops_at_first_gap() {
        let (mut s, _, _) = store(4, 4096);
        for t in 0..3 {
            s.commit_raw(&ramp(10, 0), 10, t).unwrap();
        }
        s.delete(1).unwrap();
        let listed = s.enumerate().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].index, 0);

        // The gap is refilled first.
        assert_eq!(s.commit_raw(&ramp(10, 0), 10, 99).unwrap(), 1);
        let listed = s.enumerate().unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[1].timestamp, 99);
    }

    #[test]
    fn delete_all_empties_region() {
        let (mut s, _, _) = store(3, 4096);
        s.commit_raw(&ramp(10, 0), 10, 0).unwrap();
        s.commit_raw(&ramp(10, 0), 10, 0).unwrap();
        s.delete_all().unwrap();
        assert_eq!(s.capture_count().unwrap(), 0);
        let stats = s.stats().unwrap();
        assert_eq!(stats.free_bytes, stats.total_bytes);
    }

    #[test]
    fn flash_operations_are_bracketed() {
        let (mut s, wd, lockout) = store(2, 4096);
        s.commit_raw(&ramp(10, 0), 10, 0).unwrap();
        s.delete(0).unwrap();
        s.delete_all().unwrap();
        assert_eq!(wd.bracket_counts(), (3, 3));
        assert_eq!(lockout.pause_count(), 3);
        assert!(wd.is_enabled());
    }

    #[test]
    fn disabled_watchdog_stays_disabled() {
        let (mut s, wd, _) = store(1, 4096);
        wd.suspend();
        s.commit_raw(&ramp(10, 0), 10, 0).unwrap();
        assert!(!wd.is_enabled());
    }

    #[test]
    fn erase_covers_only_required_sectors() {
        let (mut s, _, _) = store(1, 16384);
        s.flash_mut().bytes_mut()[8192] = 0x00;
        s.commit_raw(&ramp(100, 0), 100, 0).unwrap();
        // 224-byte image: one sector erased, the rest untouched.
        assert_eq!(s.flash().read(8192, 1).unwrap(), &[0x00]);
        assert_eq!(s.flash().read(224, 32).unwrap(), &[0xFF; 32]);
        assert_eq!(s.flash().erase_count(), 1);
        assert_eq!(s.flash().program_count(), 1);
    }

    #[test]
    fn oversized_sample_count_is_malformed() {
        let (mut s, _, _) = store(2, 4096);
        s.commit_raw(&ramp(10, 0), 10, 0).unwrap();
        let erases = s.flash().erase_count();

        // A torn header: magic and version intact, count all ones.
        s.flash_mut().bytes_mut()[12..16].copy_from_slice(&u32::MAX.to_le_bytes());

        let damaged = StoreError::MalformedHeader {
            slot: 0,
            reason: "sample count exceeds slot",
        };
        assert_eq!(s.read(0).err(), Some(damaged.clone()));
        assert_eq!(s.verify(0), Err(damaged.clone()));
        assert_eq!(s.fetch(0), Err(damaged));
        assert_eq!(s.enumerate().unwrap()[0].sample_count, u32::MAX);
        assert_eq!(s.flash().erase_count(), erases);
    }

    #[test]
    fn init_rejects_bad_geometry() {
        let wd = Arc::new(SoftWatchdog::new(Duration::from_secs(1)));
        let cfg = StorageConfig {
            slot_size: 4096,
            max_slots: 4,
            sample_rate_hz: 5000,
        };
        let small = CaptureStore::new(RamFlash::new(8192, 4096, 256), Arc::clone(&wd), Lockout::new(), cfg);
        assert!(matches!(small.init(), Err(StoreError::Configuration(_))));

        let odd = StorageConfig {
            slot_size: 5000,
            ..cfg
        };
        let misaligned = CaptureStore::new(RamFlash::new(65536, 4096, 256), wd, Lockout::new(), odd);
        assert!(matches!(misaligned.init(), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn max_samples_accounts_for_header() {
        let (s, _, _) = store(1, 4096);
        assert_eq!(s.max_samples(false), (4096 - 32) / 2);
        assert_eq!(s.max_samples(true), (4096 - 32) / 4);
    }
}
