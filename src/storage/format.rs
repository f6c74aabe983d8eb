// VoltWatch — Capture Binary Format
//
// All fields little-endian u32, encoded field by field:
//
//   v1 (24 bytes): magic, version, sample_rate, sample_count, timestamp, checksum
//   v2 (32 bytes): v1 fields + has_derived, checksum_derived
//
// followed by `sample_count` u16 raw samples and, for v2 with has_derived=1,
// the same number of derived samples.

use crc::{Crc, CRC_32_ISO_HDLC};

/// "ADCS" read as a little-endian u32.
pub const MAGIC: u32 = 0x4144_4353;
pub const VERSION_RAW: u32 = 1;
pub const VERSION_DERIVED: u32 = 2;
pub const HEADER_LEN_V1: usize = 24;
pub const HEADER_LEN_V2: usize = 32;
pub const SAMPLE_BYTES: usize = 2;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 over a payload's little-endian bytes.
pub fn checksum(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// CRC-32 over samples, computed as if they were already serialised.
pub fn checksum_samples(samples: &[u16]) -> u32 {
    let mut digest = CRC32.digest();
    for s in samples {
        digest.update(&s.to_le_bytes());
    }
    digest.finalize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    pub version: u32,
    pub sample_rate: u32,
    pub sample_count: u32,
    pub timestamp: u32,
    pub checksum: u32,
    /// Checksum of the derived channel, present only in v2 captures that
    /// carry one.
    pub checksum_derived: Option<u32>,
}

/// Why a slot's bytes could not be decoded into a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Magic does not match: the slot is empty (or erased).
    Empty,
    Truncated,
    UnknownVersion,
    BadDerivedFlag,
}

impl CaptureHeader {
    /// Header for a capture of `sample_count` samples.
    pub fn new(
        sample_rate: u32,
        sample_count: u32,
        timestamp: u32,
        checksum: u32,
        checksum_derived: Option<u32>,
    ) -> Self {
        Self {
            version: if checksum_derived.is_some() {
                VERSION_DERIVED
            } else {
                VERSION_RAW
            },
            sample_rate,
            sample_count,
            timestamp,
            checksum,
            checksum_derived,
        }
    }

    pub fn has_derived(&self) -> bool {
        self.checksum_derived.is_some()
    }

    /// Encoded header length for this version.
    pub fn header_len(&self) -> usize {
        if self.version >= VERSION_DERIVED {
            HEADER_LEN_V2
        } else {
            HEADER_LEN_V1
        }
    }

    /// Bytes of one channel's payload. Saturates for counts no slot can hold.
    pub fn channel_bytes(&self) -> usize {
        (self.sample_count as usize).saturating_mul(SAMPLE_BYTES)
    }

    /// Header plus all payload bytes; `None` if that overflows `usize`.
    pub fn image_len(&self) -> Option<usize> {
        let channels: usize = if self.has_derived() { 2 } else { 1 };
        usize::try_from(self.sample_count)
            .ok()?
            .checked_mul(SAMPLE_BYTES)?
            .checked_mul(channels)?
            .checked_add(self.header_len())
    }

    /// Serialise into the front of `out`, returning the number of bytes written.
    /// `out` must hold at least [`CaptureHeader::header_len`] bytes.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        let mut fields = [
            MAGIC,
            self.version,
            self.sample_rate,
            self.sample_count,
            self.timestamp,
            self.checksum,
            0,
            0,
        ];
        let count = if self.version >= VERSION_DERIVED {
            fields[6] = u32::from(self.has_derived());
            fields[7] = self.checksum_derived.unwrap_or(0);
            8
        } else {
            6
        };
        for (chunk, field) in out.chunks_exact_mut(4).zip(&fields[..count]) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        count * 4
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let field = |i: usize| -> Option<u32> {
            let b = bytes.get(i * 4..i * 4 + 4)?;
            Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };

        let magic = field(0).ok_or(DecodeError::Truncated)?;
        if magic != MAGIC {
            return Err(DecodeError::Empty);
        }
        let version = field(1).ok_or(DecodeError::Truncated)?;
        let base = |checksum_derived| -> Result<Self, DecodeError> {
            Ok(Self {
                version,
                sample_rate: field(2).ok_or(DecodeError::Truncated)?,
                sample_count: field(3).ok_or(DecodeError::Truncated)?,
                timestamp: field(4).ok_or(DecodeError::Truncated)?,
                checksum: field(5).ok_or(DecodeError::Truncated)?,
                checksum_derived,
            })
        };

        match version {
            VERSION_RAW => base(None),
            VERSION_DERIVED => {
                let has_derived = field(6).ok_or(DecodeError::Truncated)?;
                let checksum_derived = field(7).ok_or(DecodeError::Truncated)?;
                match has_derived {
                    0 => base(None),
                    1 => base(Some(checksum_derived)),
                    _ => Err(DecodeError::BadDerivedFlag),
                }
            }
            _ => Err(DecodeError::UnknownVersion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_spells_adcs() {
        assert_eq!(&MAGIC.to_le_bytes(), b"SCDA");
        assert_eq!(&MAGIC.to_be_bytes(), b"ADCS");
    }

    #[test]
    fn crc_matches_reference_vector() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn sample_checksum_matches_byte_checksum() {
        let samples = [0x0102u16, 0xFFEE, 7];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(checksum_samples(&samples), checksum(&bytes));
    }

    #[test]
    fn v1_layout() {
        let h = CaptureHeader::new(5000, 10, 1234, 0xDEAD_BEEF, None);
        let mut buf = [0u8; HEADER_LEN_V2];
        assert_eq!(h.encode(&mut buf), HEADER_LEN_V1);
        assert_eq!(&buf[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&buf[4..8], &1u32.to_le_bytes());
        assert_eq!(&buf[8..12], &5000u32.to_le_bytes());
        assert_eq!(&buf[20..24], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(h.image_len(), Some(24 + 20));
        assert_eq!(CaptureHeader::decode(&buf[..HEADER_LEN_V1]), Ok(h));
    }

    #[test]
    fn v2_layout() {
        let h = CaptureHeader::new(5000, 50_000, 1, 2, Some(3));
        let mut buf = [0u8; HEADER_LEN_V2];
        assert_eq!(h.encode(&mut buf), HEADER_LEN_V2);
        assert_eq!(&buf[4..8], &2u32.to_le_bytes());
        assert_eq!(&buf[24..28], &1u32.to_le_bytes());
        assert_eq!(&buf[28..32], &3u32.to_le_bytes());
        assert_eq!(h.image_len(), Some(32 + 200_000));
        assert_eq!(CaptureHeader::decode(&buf), Ok(h));
    }

    #[test]
    fn huge_count_never_wraps() {
        let h = CaptureHeader::new(5000, u32::MAX, 0, 0, Some(0));
        assert_eq!(h.channel_bytes(), (u32::MAX as usize).saturating_mul(2));
        match h.image_len() {
            Some(len) => assert!(len > u32::MAX as usize),
            None => assert!(usize::BITS <= 32),
        }
    }

    #[test]
    fn erased_bytes_decode_as_empty() {
        assert_eq!(CaptureHeader::decode(&[0xFF; 32]), Err(DecodeError::Empty));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = [0u8; 32];
        buf[..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(CaptureHeader::decode(&buf), Err(DecodeError::UnknownVersion));
    }
}
