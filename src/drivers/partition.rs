// VoltWatch — Capture Partition (ESP32-C3)
//
// The `captures` data partition, memory-mapped once for zero-copy reads and
// written through the partition API.

use core::ffi::{c_void, CStr};

use crate::error::FlashError;
use crate::storage::flash::{check_range, FlashRegion};

pub struct PartitionFlash {
    partition: *const esp_idf_sys::esp_partition_t,
    map: *const u8,
    map_handle: esp_idf_sys::esp_partition_mmap_handle_t,
    size: usize,
    erase_size: usize,
    program_size: usize,
}

// SAFETY: the partition descriptor is static and the mapping is read-only;
// writes go through `&mut self`.
unsafe impl Send for PartitionFlash {}
unsafe impl Sync for PartitionFlash {}

impl PartitionFlash {
    /// Find the data partition named `label` and map all of it.
    pub fn open(label: &CStr, program_size: usize) -> Result<Self, FlashError> {
        unsafe {
            let partition = esp_idf_sys::esp_partition_find_first(
                esp_idf_sys::esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_idf_sys::esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                label.as_ptr(),
            );
            if partition.is_null() {
                return Err(FlashError::Device(format!(
                    "partition {:?} not found",
                    label
                )));
            }
            let size = (*partition).size as usize;
            let erase_size = (*partition).erase_size as usize;

            let mut map: *const c_void = core::ptr::null();
            let mut map_handle: esp_idf_sys::esp_partition_mmap_handle_t = 0;
            let ret = esp_idf_sys::esp_partition_mmap(
                partition,
                0,
                size,
                esp_idf_sys::esp_partition_mmap_memory_t_ESP_PARTITION_MMAP_DATA,
                &mut map,
                &mut map_handle,
            );
            if ret != esp_idf_sys::ESP_OK {
                return Err(FlashError::Device(format!("mmap failed ({ret})")));
            }

            log::info!(
                "Partition {:?} at {:#x}, {} KiB, sector {} B",
                label,
                (*partition).address,
                size / 1024,
                erase_size
            );
            Ok(Self {
                partition,
                map: map as *const u8,
                map_handle,
                size,
                erase_size,
                program_size,
            })
        }
    }
}

impl FlashRegion for PartitionFlash {
    fn size(&self) -> usize {
        self.size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn program_size(&self) -> usize {
        self.program_size
    }

    fn read(&self, offset: usize, len: usize) -> Result<&[u8], FlashError> {
        check_range(offset, len, self.size, 0)?;
        // SAFETY: the whole partition stays mapped for the lifetime of self.
        Ok(unsafe { core::slice::from_raw_parts(self.map.add(offset), len) })
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        check_range(offset, len, self.size, self.erase_size)?;
        let ret = unsafe { esp_idf_sys::esp_partition_erase_range(self.partition, offset, len) };
        if ret != esp_idf_sys::ESP_OK {
            return Err(FlashError::Device(format!(
                "erase {offset:#x}+{len:#x} failed ({ret})"
            )));
        }
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        check_range(offset, data.len(), self.size, self.program_size)?;
        let ret = unsafe {
            esp_idf_sys::esp_partition_write(
                self.partition,
                offset,
                data.as_ptr() as *const c_void,
                data.len(),
            )
        };
        if ret != esp_idf_sys::ESP_OK {
            return Err(FlashError::Device(format!(
                "write {offset:#x}+{:#x} failed ({ret})",
                data.len()
            )));
        }
        Ok(())
    }
}

impl Drop for PartitionFlash {
    fn drop(&mut self) {
        unsafe { esp_idf_sys::esp_partition_munmap(self.map_handle) };
    }
}
