//! Kernel virtual/physical translation

use crate::{BootError, Result};

/// Virtual and physical base pair of the loaded kernel
///
/// `vtop(va) = va - virt_base + phys_base`. Passed explicitly to every step
/// that needs to translate kernel addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSlide {
    pub virt_base: u64,
    pub phys_base: u64,
}

impl KernelSlide {
    pub fn new(virt_base: u64, phys_base: u64) -> Self {
        Self {
            virt_base,
            phys_base,
        }
    }

    /// Translate a kernel virtual address to guest physical
    pub fn vtop(&self, va: u64) -> Result<u64> {
        va.checked_sub(self.virt_base)
            .and_then(|offset| self.phys_base.checked_add(offset))
            .ok_or(BootError::AddressOverflow("virtual address outside kernel mapping"))
    }

    /// Translate a guest physical address to kernel virtual
    pub fn ptov(&self, pa: u64) -> Result<u64> {
        pa.checked_sub(self.phys_base)
            .and_then(|offset| self.virt_base.checked_add(offset))
            .ok_or(BootError::AddressOverflow("physical address outside kernel mapping"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation() {
        let slide = KernelSlide::new(0xFFFF_FFF0_0000_0000, 0x4000_0000);

        assert_eq!(slide.vtop(0xFFFF_FFF0_07B4_A53C).unwrap(), 0x47B4_A53C);
        assert_eq!(slide.ptov(0x481D_0000).unwrap(), 0xFFFF_FFF0_081D_0000);
        assert_eq!(slide.ptov(slide.vtop(0xFFFF_FFF0_0811_CE98).unwrap()).unwrap(), 0xFFFF_FFF0_0811_CE98);
    }

    #[test]
    fn test_out_of_range() {
        let slide = KernelSlide::new(0xFFFF_FFF0_0000_0000, 0x4000_0000);
        assert!(slide.vtop(0x1000).is_err());
        assert!(slide.ptov(0x1000).is_err());
    }
}
