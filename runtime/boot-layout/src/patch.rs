//! Kernel Patch Engine
//!
//! Overwrites single instructions of the loaded kernel before it runs. The
//! default table neutralises the read-only-region lockdown, guarded
//! execution enable and the PPL lockdown check, none of which the virtual
//! platform implements.

use t8030_guest_memory::GuestMemory;

use crate::{KernelSlide, Result};

/// `nop`
pub const NOP_INST: u32 = 0xd503_201f;

/// `ret`
pub const RET_INST: u32 = 0xd65f_03c0;

/// One instruction overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchEntry {
    /// Kernel symbol the address belongs to (diagnostics only)
    pub symbol: &'static str,

    /// Kernel virtual address of the instruction
    pub vaddr: u64,

    /// Replacement instruction word
    pub word: u32,
}

impl PatchEntry {
    pub const fn new(symbol: &'static str, vaddr: u64, word: u32) -> Self {
        Self {
            symbol,
            vaddr,
            word,
        }
    }
}

/// Patches applied to the T8030 kernel
pub const T8030_KERNEL_PATCHES: &[PatchEntry] = &[
    PatchEntry::new("rorgn_stash_range", 0xFFFF_FFF0_07B4_A53C, RET_INST),
    PatchEntry::new("rorgn_lockdown", 0xFFFF_FFF0_07B4_AECC, RET_INST),
    PatchEntry::new("gxf_enable", 0xFFFF_FFF0_0811_CE98, NOP_INST),
    PatchEntry::new("pmap_ppl_locked_down", 0xFFFF_FFF0_07B5_A5A8, NOP_INST),
];

/// Apply `patches` to the kernel image in guest memory
///
/// Each word is written little-endian at `vtop(vaddr)`. Applying the same
/// table twice leaves memory unchanged after the first pass.
///
/// # Errors
/// - `AddressOverflow` if a target lies below the kernel virtual base
/// - `AddressSpaceWrite` if the target is not backed by RAM
pub fn apply_patches(
    patches: &[PatchEntry],
    slide: &KernelSlide,
    memory: &mut dyn GuestMemory,
) -> Result<()> {
    for patch in patches {
        let pa = slide.vtop(patch.vaddr)?;
        memory.write_u32(pa, patch.word)?;
        log::debug!(
            "Patched {} at {:#x} (pa {:#x}) with {:#010x}",
            patch.symbol,
            patch.vaddr,
            pa,
            patch.word
        );
    }

    log::info!("Applied {} kernel patches", patches.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BootError;
    use t8030_guest_memory::GuestAddressSpace;

    const VIRT_BASE: u64 = 0xFFFF_FFF0_0000_0000;
    const PHYS_BASE: u64 = 0x4000_0000;

    fn kernel_memory() -> GuestAddressSpace {
        let mut memory = GuestAddressSpace::new();
        memory.add_ram("kernel", 0x4700_0000, 0x120_0000).unwrap();
        for patch in T8030_KERNEL_PATCHES {
            // Placeholder `b .` at each site
            memory
                .write_u32(patch.vaddr - VIRT_BASE + PHYS_BASE, 0x1400_0000)
                .unwrap();
        }
        memory
    }

    #[test]
    fn test_default_table() {
        let mut memory = kernel_memory();
        let slide = KernelSlide::new(VIRT_BASE, PHYS_BASE);

        apply_patches(T8030_KERNEL_PATCHES, &slide, &mut memory).unwrap();

        assert_eq!(memory.read_u32(0x47B4_A53C).unwrap(), RET_INST);
        assert_eq!(memory.read_u32(0x47B4_AECC).unwrap(), RET_INST);
        assert_eq!(memory.read_u32(0x4811_CE98).unwrap(), NOP_INST);
        assert_eq!(memory.read_u32(0x47B5_A5A8).unwrap(), NOP_INST);

        // Little-endian encoding of `ret`
        let mut raw = [0u8; 4];
        memory.read(0x47B4_A53C, &mut raw).unwrap();
        assert_eq!(raw, [0xc0, 0x03, 0x5f, 0xd6]);
    }

    #[test]
    fn test_idempotent() {
        let slide = KernelSlide::new(VIRT_BASE, PHYS_BASE);

        let mut once = kernel_memory();
        apply_patches(T8030_KERNEL_PATCHES, &slide, &mut once).unwrap();

        let mut twice = kernel_memory();
        apply_patches(T8030_KERNEL_PATCHES, &slide, &mut twice).unwrap();
        apply_patches(T8030_KERNEL_PATCHES, &slide, &mut twice).unwrap();

        for patch in T8030_KERNEL_PATCHES {
            let pa = slide.vtop(patch.vaddr).unwrap();
            assert_eq!(once.read_u32(pa).unwrap(), twice.read_u32(pa).unwrap());
        }
    }

    #[test]
    fn test_unbacked_target_fails() {
        let mut memory = GuestAddressSpace::new();
        let slide = KernelSlide::new(VIRT_BASE, PHYS_BASE);

        let result = apply_patches(T8030_KERNEL_PATCHES, &slide, &mut memory);
        assert!(matches!(result, Err(BootError::AddressSpaceWrite(_))));
    }

    #[test]
    fn test_target_below_virtual_base() {
        let mut memory = kernel_memory();
        let slide = KernelSlide::new(0xFFFF_FFF0_1000_0000, PHYS_BASE);

        let result = apply_patches(T8030_KERNEL_PATCHES, &slide, &mut memory);
        assert!(matches!(result, Err(BootError::AddressOverflow(_))));
    }
}
