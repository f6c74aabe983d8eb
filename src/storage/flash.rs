// VoltWatch — Durable Medium Abstraction
//
// NOR-flash semantics: erase sets whole sectors to 0xFF, program can only
// clear bits and works in page-sized units, reads are memory-mapped so they
// return views instead of copies.

use crate::error::FlashError;

/// A byte-addressable window onto the capture partition.
///
/// Offsets are relative to the start of the region.
pub trait FlashRegion {
    /// Region size in bytes.
    fn size(&self) -> usize;

    /// Erase granularity (sector size).
    fn erase_size(&self) -> usize;

    /// Program granularity (page size).
    fn program_size(&self) -> usize;

    /// In-place view of `len` bytes at `offset`.
    fn read(&self, offset: usize, len: usize) -> Result<&[u8], FlashError>;

    /// Erase `len` bytes at `offset`. Both must be sector-aligned.
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError>;

    /// Program `data` at `offset`. Both must be page-aligned.
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError>;
}

pub(crate) fn check_range(
    offset: usize,
    len: usize,
    size: usize,
    granularity: usize,
) -> Result<(), FlashError> {
    let end = offset.checked_add(len).ok_or(FlashError::OutOfBounds { offset, len, size })?;
    if end > size {
        return Err(FlashError::OutOfBounds { offset, len, size });
    }
    if granularity > 0 && (offset % granularity != 0 || len % granularity != 0) {
        return Err(FlashError::Misaligned {
            offset,
            len,
            granularity,
        });
    }
    Ok(())
}

/// RAM-backed flash with NOR semantics, used by the hosted build and tests.
#[derive(Debug, Clone)]
pub struct RamFlash {
    data: Vec<u8>,
    erase_size: usize,
    program_size: usize,
    erases: usize,
    programs: usize,
}

impl RamFlash {
    pub fn new(size: usize, erase_size: usize, program_size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
            erase_size,
            program_size,
            erases: 0,
            programs: 0,
        }
    }

    /// Raw mutable access, for fault injection in tests.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Number of erase calls so far.
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Number of program calls so far.
    pub fn program_count(&self) -> usize {
        self.programs
    }
}

impl FlashRegion for RamFlash {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn program_size(&self) -> usize {
        self.program_size
    }

    fn read(&self, offset: usize, len: usize) -> Result<&[u8], FlashError> {
        check_range(offset, len, self.data.len(), 0)?;
        Ok(&self.data[offset..offset + len])
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        check_range(offset, len, self.data.len(), self.erase_size)?;
        self.data[offset..offset + len].fill(0xFF);
        self.erases += 1;
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        check_range(offset, data.len(), self.data.len(), self.program_size)?;
        // Programming can only clear bits.
        for (dst, src) in self.data[offset..offset + data.len()].iter_mut().zip(data) {
            *dst &= *src;
        }
        self.programs += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_resets_to_ones() {
        let mut f = RamFlash::new(8192, 4096, 256);
        f.program(0, &[0u8; 256]).unwrap();
        f.erase(0, 4096).unwrap();
        assert!(f.read(0, 256).unwrap().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn program_only_clears_bits() {
        let mut f = RamFlash::new(4096, 4096, 256);
        f.program(0, &[0x0F; 256]).unwrap();
        f.program(0, &[0xF3; 256]).unwrap();
        assert_eq!(f.read(0, 1).unwrap(), &[0x03]);
    }

    #[test]
    fn rejects_misaligned_and_out_of_bounds() {
        let mut f = RamFlash::new(8192, 4096, 256);
        assert!(matches!(f.erase(100, 4096), Err(FlashError::Misaligned { .. })));
        assert!(matches!(f.program(0, &[0; 10]), Err(FlashError::Misaligned { .. })));
        assert!(matches!(f.erase(4096, 8192), Err(FlashError::OutOfBounds { .. })));
        assert!(matches!(f.read(8000, 500), Err(FlashError::OutOfBounds { .. })));
    }
}
