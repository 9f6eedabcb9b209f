//! Guest Memory - Guest physical address space for the T8030 machine
//!
//! # Purpose
//! Models the guest physical address space the boot blobs are written into.
//! RAM regions are backed by lazily allocated pages so multi-gigabyte DRAM
//! windows cost nothing until touched; MMIO regions dispatch to device
//! models (core/cluster register windows, the console UART).
//!
//! # Integration Points
//! - Depends on: nothing
//! - Provides to: boot-layout (blob writes), cpu-model (register windows),
//!   machine (address space ownership)
//!
//! # Testing Strategy
//! - Unit tests: region bookkeeping, page-crossing writes, MMIO dispatch

mod mmio;
mod space;

pub use mmio::{access_mask, MmioDevice};
pub use space::{GuestAddressSpace, RegionInfo, PAGE_SIZE};

use thiserror::Error;

/// Error types for guest memory operations
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Unmapped guest access at {addr:#x} ({len} bytes)")]
    Unmapped { addr: u64, len: usize },

    #[error("Region '{name}' at {base:#x} (size {size:#x}) overlaps '{existing}'")]
    Overlap {
        name: String,
        base: u64,
        size: u64,
        existing: String,
    },

    #[error("Region '{name}' at {base:#x} (size {size:#x}) overflows the address space")]
    Overflow { name: String, base: u64, size: u64 },

    #[error("Region '{name}' has zero size")]
    ZeroSized { name: String },
}

pub type Result<T> = core::result::Result<T, MemoryError>;

/// Write/read primitive used by every loader and by the patch engine
///
/// Addresses are guest physical. Implementations must reject accesses that
/// are not fully contained in one backed RAM region.
pub trait GuestMemory {
    /// Back `[base, base + size)` with zero-initialised RAM
    fn add_ram(&mut self, name: &str, base: u64, size: u64) -> Result<()>;

    /// Copy `data` into guest memory at `addr`
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<()>;

    /// Fill `buf` from guest memory at `addr`
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()>;

    fn write_u32(&mut self, addr: u64, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    fn read_u32(&self, addr: u64) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&self, addr: u64) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read(addr, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }
}

/// Align address up to a power-of-two boundary, `None` on overflow
pub const fn align_up(addr: u64, align: u64) -> Option<u64> {
    match addr.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align address down to a power-of-two boundary
pub const fn align_down(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

/// Check if address is aligned to a power-of-two boundary
pub const fn is_aligned(addr: u64, align: u64) -> bool {
    (addr & (align - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(align_up(0x1234, 0x1000), Some(0x2000));
        assert_eq!(align_up(0x1000, 0x1000), Some(0x1000));
        assert_eq!(align_up(0, 0x10000), Some(0));
        assert_eq!(align_down(0x1_2345, 0x10000), 0x1_0000);
        assert!(is_aligned(0x4000_0000, 0x10000));
        assert!(!is_aligned(0x4000_0100, 0x10000));
    }

    #[test]
    fn test_align_up_overflow() {
        assert_eq!(align_up(u64::MAX - 4, 0x10000), None);
        assert_eq!(align_up(u64::MAX & !0xFFFF, 0x10000), Some(u64::MAX & !0xFFFF));
    }
}
