//! Register bank and its two access paths
//!
//! A bank holds one 64-bit slot per register definition. The system-register
//! path looks slots up by encoding; the MMIO path addresses register `i` at
//! byte offset `8 * i` of the owner's implementation window. Both paths go
//! through the same lock, so a value written on one path is immediately
//! visible on the other.

use std::sync::Arc;

use storage::Slots;
use spin::Mutex;

use t8030_guest_memory::{access_mask, is_aligned, MmioDevice};

use crate::sysreg::{SysRegAccess, SysRegDef, SysRegKey};

/// Stride between registers in an implementation window
pub const MMIO_REG_STRIDE: u64 = 8;

/// Storage for one core's or cluster's registers
pub struct RegisterBank {
    defs: &'static [SysRegDef],
    slots: Mutex<Slots>,
}

impl RegisterBank {
    /// Create a bank with every register at its reset value
    pub fn new(defs: &'static [SysRegDef]) -> Self {
        Self {
            defs,
            slots: Mutex::new(Slots::from_defs(defs)),
        }
    }

    pub fn definitions(&self) -> &'static [SysRegDef] {
        self.defs
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Index of the register with encoding `key`
    pub fn index_of(&self, key: SysRegKey) -> Option<usize> {
        self.defs.iter().position(|d| d.key == key)
    }

    /// Index of the register named `name`
    pub fn index_by_name(&self, name: &str) -> Option<usize> {
        self.defs.iter().position(|d| d.name == name)
    }

    pub fn read_index(&self, index: usize) -> Option<u64> {
        self.slots.lock().get(index)
    }

    pub fn write_index(&self, index: usize, value: u64) -> bool {
        self.slots.lock().set(index, value)
    }

    /// Read register `name`, `None` if the bank does not define it
    pub fn read_named(&self, name: &str) -> Option<u64> {
        self.read_index(self.index_by_name(name)?)
    }

    /// System-register view of this bank
    pub fn sysreg(&self) -> SysRegPath<'_> {
        SysRegPath { bank: self }
    }

    fn mmio_slot(&self, offset: u64, size: u32) -> Option<(usize, u32)> {
        if !matches!(size, 4 | 8) || !is_aligned(offset, u64::from(size)) {
            return None;
        }

        let index = usize::try_from(offset / MMIO_REG_STRIDE).ok()?;
        let shift = ((offset % MMIO_REG_STRIDE) * 8) as u32;
        (index < self.defs.len()).then_some((index, shift))
    }

    /// Load through the MMIO path
    ///
    /// Returns `None` for offsets that do not map to a register or for
    /// unsupported access sizes.
    pub fn mmio_read(&self, offset: u64, size: u32) -> Option<u64> {
        let (index, shift) = self.mmio_slot(offset, size)?;
        let value = self.slots.lock().get(index)?;
        Some((value >> shift) & access_mask(size))
    }

    /// Store through the MMIO path
    ///
    /// 4-byte stores replace one half of the slot under the bank lock.
    /// Returns `false` if the access did not hit a register.
    pub fn mmio_write(&self, offset: u64, value: u64, size: u32) -> bool {
        let Some((index, shift)) = self.mmio_slot(offset, size) else {
            return false;
        };
        let mask = access_mask(size) << shift;

        let mut slots = self.slots.lock();
        match slots.get(index) {
            Some(old) => slots.set(index, (old & !mask) | ((value << shift) & mask)),
            None => false,
        }
    }
}

/// System-register access path of a bank
#[derive(Clone, Copy)]
pub struct SysRegPath<'a> {
    bank: &'a RegisterBank,
}

impl SysRegPath<'_> {
    /// Handle `mrs` of `key` from EL1
    pub fn read(&self, key: SysRegKey) -> Option<u64> {
        let index = self.bank.index_of(key)?;
        if !self.bank.defs[index].access.contains(SysRegAccess::EL1_R) {
            return None;
        }
        self.bank.read_index(index)
    }

    /// Handle `msr` of `key` from EL1
    ///
    /// Returns `false` if the encoding is not defined or not writable.
    pub fn write(&self, key: SysRegKey, value: u64) -> bool {
        let Some(index) = self.bank.index_of(key) else {
            return false;
        };
        if !self.bank.defs[index].access.contains(SysRegAccess::EL1_W) {
            return false;
        }
        self.bank.write_index(index, value)
    }
}

/// Implementation-register window of a core or cluster
///
/// Maps a bank into the guest address space. Accesses that miss every
/// register are logged and read as zero.
pub struct ImplWindow {
    label: String,
    bank: Arc<RegisterBank>,
}

impl ImplWindow {
    pub fn new(label: impl Into<String>, bank: Arc<RegisterBank>) -> Self {
        Self {
            label: label.into(),
            bank,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl MmioDevice for ImplWindow {
    fn read(&self, offset: u64, size: u32) -> u64 {
        match self.bank.mmio_read(offset, size) {
            Some(value) => {
                log::trace!("{} impl-reg READ @ {:#x} -> {:#x}", self.label, offset, value);
                value
            }
            None => {
                log::warn!("{} impl-reg READ @ {:#x} (size {})", self.label, offset, size);
                0
            }
        }
    }

    fn write(&self, offset: u64, value: u64, size: u32) {
        if self.bank.mmio_write(offset, value, size) {
            log::trace!("{} impl-reg WRITE @ {:#x} value {:#x}", self.label, offset, value);
        } else {
            log::warn!(
                "{} impl-reg WRITE @ {:#x} value {:#x} (size {})",
                self.label,
                offset,
                value,
                size
            );
        }
    }
}

mod storage {
    use crate::sysreg::SysRegDef;

    /// Slot storage behind the bank lock
    pub(super) struct Slots(Vec<u64>);

    impl Slots {
        pub(super) fn from_defs(defs: &[SysRegDef]) -> Self {
            Self(defs.iter().map(|d| d.reset).collect())
        }

        pub(super) fn get(&self, index: usize) -> Option<u64> {
            self.0.get(index).copied()
        }

        pub(super) fn set(&mut self, index: usize, value: u64) -> bool {
            match self.0.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysreg::T8030_CORE_REGISTERS;

    fn key(name: &str) -> SysRegKey {
        T8030_CORE_REGISTERS
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.key)
            .unwrap()
    }

    #[test]
    fn test_reset_state() {
        let bank = RegisterBank::new(T8030_CORE_REGISTERS);
        assert_eq!(bank.read_named("APCTL_EL1"), Some(2));
        assert_eq!(bank.read_named("HID11"), Some(0));
        assert_eq!(bank.read_named("NOT_A_REG"), None);
    }

    #[test]
    fn test_sysreg_path() {
        let bank = RegisterBank::new(T8030_CORE_REGISTERS);
        let path = bank.sysreg();

        assert!(path.write(key("HID4"), 0xDEAD_BEEF));
        assert_eq!(path.read(key("HID4")), Some(0xDEAD_BEEF));

        // Unknown encodings are reported, not stored
        let unknown = SysRegKey::new(3, 0, 15, 14, 7);
        assert!(!path.write(unknown, 1));
        assert_eq!(path.read(unknown), None);
    }

    #[test]
    fn test_sysreg_then_mmio() {
        let bank = RegisterBank::new(T8030_CORE_REGISTERS);
        let index = bank.index_of(key("KERNELKEYHI_EL1")).unwrap() as u64;

        bank.sysreg().write(key("KERNELKEYHI_EL1"), 0x1122_3344_5566_7788);
        assert_eq!(bank.mmio_read(index * 8, 8), Some(0x1122_3344_5566_7788));
        assert_eq!(bank.mmio_read(index * 8, 4), Some(0x5566_7788));
        assert_eq!(bank.mmio_read(index * 8 + 4, 4), Some(0x1122_3344));
    }

    #[test]
    fn test_mmio_then_sysreg() {
        let bank = RegisterBank::new(T8030_CORE_REGISTERS);
        let index = bank.index_of(key("CYC_OVRD")).unwrap() as u64;

        assert!(bank.mmio_write(index * 8, 0xAAAA_BBBB_CCCC_DDDD, 8));
        // Sub-word store only replaces the high half
        assert!(bank.mmio_write(index * 8 + 4, 0x1234_5678, 4));
        assert_eq!(bank.sysreg().read(key("CYC_OVRD")), Some(0x1234_5678_CCCC_DDDD));
    }

    #[test]
    fn test_mmio_rejects_bad_accesses() {
        let bank = RegisterBank::new(T8030_CORE_REGISTERS);

        // Past the last register
        assert_eq!(bank.mmio_read(39 * 8, 8), None);
        assert!(!bank.mmio_write(0x8000, 1, 8));
        // Misaligned or odd sizes
        assert_eq!(bank.mmio_read(4, 8), None);
        assert_eq!(bank.mmio_read(2, 4), None);
        assert_eq!(bank.mmio_read(0, 2), None);
    }

    #[test]
    fn test_every_register_both_paths() {
        let values = [
            0,
            1,
            u64::MAX,
            0x8000_0000_0000_0000,
            0xAAAA_AAAA_AAAA_AAAA,
            0x5555_5555_5555_5555,
        ];
        let bank = RegisterBank::new(T8030_CORE_REGISTERS);
        let path = bank.sysreg();
        assert_eq!(bank.definitions().len(), 39);

        for (i, def) in bank.definitions().iter().enumerate() {
            let offset = i as u64 * 8;
            for value in values {
                assert!(path.write(def.key, value), "{}", def.name);
                assert_eq!(bank.mmio_read(offset, 8), Some(value), "{}", def.name);
                assert_eq!(bank.mmio_read(offset, 4), Some(value & 0xFFFF_FFFF), "{}", def.name);
                assert_eq!(bank.mmio_read(offset + 4, 4), Some(value >> 32), "{}", def.name);

                let flipped = !value;
                assert!(bank.mmio_write(offset, flipped, 8), "{}", def.name);
                assert_eq!(path.read(def.key), Some(flipped), "{}", def.name);
            }
        }
    }

    #[test]
    fn test_window_reads_zero_on_miss() {
        let bank = Arc::new(RegisterBank::new(&[]));
        let window = ImplWindow::new("Cluster 0", bank);

        window.write(0x40, 0xFFFF, 8);
        assert_eq!(window.read(0x40, 8), 0);
        assert_eq!(window.label(), "Cluster 0");
    }
}
