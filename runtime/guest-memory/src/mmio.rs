//! MMIO device interface
//!
//! Device models are shared between the address space and whoever owns the
//! device (a core, a cluster, the machine), so accesses take `&self` and
//! implementations keep their own locking.

/// Memory-mapped device model
pub trait MmioDevice: Send + Sync {
    /// Read `size` bytes at `offset` within the device window
    fn read(&self, offset: u64, size: u32) -> u64;

    /// Write the low `size` bytes of `value` at `offset` within the window
    fn write(&self, offset: u64, value: u64, size: u32);
}

/// Mask covering the low `size` bytes of an access
pub fn access_mask(size: u32) -> u64 {
    match size {
        0 => 0,
        1..=7 => (1u64 << (size * 8)) - 1,
        _ => u64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mask() {
        assert_eq!(access_mask(1), 0xFF);
        assert_eq!(access_mask(2), 0xFFFF);
        assert_eq!(access_mask(4), 0xFFFF_FFFF);
        assert_eq!(access_mask(8), u64::MAX);
    }
}
