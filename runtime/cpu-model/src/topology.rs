//! CPU cores and clusters
//!
//! Cores own a register bank, an implementation window in the guest
//! address space and the architectural state the reset handler primes.
//! Secondary cores start powered off and stay that way until the guest
//! brings them up.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;
use t8030_guest_memory::MmioDevice;

use crate::bank::{ImplWindow, RegisterBank, SysRegPath};
use crate::sysreg::{T8030_CLUSTER_REGISTERS, T8030_CORE_REGISTERS};
use crate::{
    CpuError, Result, CPM_IMPL_REG_BASE, CPU_IMPL_REG_BASE, IMPL_WINDOW_SIZE, MAX_CPU,
};

/// Boot entry state of a core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryState {
    pub pc: u64,
    pub x0: u64,
}

/// One application core
pub struct CpuCore {
    id: u32,
    bank: Arc<RegisterBank>,
    mmio_base: u64,
    powered_on: AtomicBool,
    entry: Mutex<EntryState>,
}

impl CpuCore {
    /// Create core `id` in its reset state
    ///
    /// # Errors
    /// Returns `InvalidCoreId` if `id` is not below `MAX_CPU`
    pub fn new(id: u32) -> Result<Self> {
        if id as usize >= MAX_CPU {
            return Err(CpuError::InvalidCoreId(id));
        }

        Ok(Self {
            id,
            bank: Arc::new(RegisterBank::new(T8030_CORE_REGISTERS)),
            mmio_base: CPU_IMPL_REG_BASE + IMPL_WINDOW_SIZE * u64::from(id),
            powered_on: AtomicBool::new(Self::powered_at_reset(id)),
            entry: Mutex::new(EntryState::default()),
        })
    }

    fn powered_at_reset(id: u32) -> bool {
        id == 0
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Guest physical base of this core's implementation window
    pub fn mmio_base(&self) -> u64 {
        self.mmio_base
    }

    pub fn bank(&self) -> &Arc<RegisterBank> {
        &self.bank
    }

    pub fn sysreg(&self) -> SysRegPath<'_> {
        self.bank.sysreg()
    }

    /// MMIO device to map at `mmio_base`
    pub fn window(&self) -> Arc<dyn MmioDevice> {
        Arc::new(ImplWindow::new(format!("CPU {}", self.id), self.bank.clone()))
    }

    pub fn is_powered_on(&self) -> bool {
        self.powered_on.load(Ordering::Acquire)
    }

    pub fn set_powered_on(&self, on: bool) {
        self.powered_on.store(on, Ordering::Release);
    }

    pub fn entry_state(&self) -> EntryState {
        *self.entry.lock()
    }

    /// Set the state the core starts executing with
    pub fn set_entry(&self, pc: u64, x0: u64) {
        *self.entry.lock() = EntryState { pc, x0 };
    }

    /// Clear the entry state and restore the power-on default
    ///
    /// Register values are set once, when the core is created, and keep
    /// whatever the guest last wrote across resets.
    pub fn reset(&self) {
        *self.entry.lock() = EntryState::default();
        self.set_powered_on(Self::powered_at_reset(self.id));
    }
}

/// Create cores `0..count`
///
/// # Errors
/// Returns `TooManyCores` if `count` is zero or exceeds `MAX_CPU`
pub fn create_cores(count: usize) -> Result<Vec<Arc<CpuCore>>> {
    if count == 0 || count > MAX_CPU {
        return Err(CpuError::TooManyCores {
            requested: count,
            max: MAX_CPU,
        });
    }

    (0..count as u32)
        .map(|id| CpuCore::new(id).map(Arc::new))
        .collect()
}

/// Cluster flavour, stored as its ASCII tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClusterKind {
    /// Efficiency cores
    E = 0x45,
    /// Performance cores
    P = 0x50,
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8 as char)
    }
}

/// A CPU cluster and its power-manager register window
pub struct Cluster {
    id: u32,
    kind: ClusterKind,
    bank: Arc<RegisterBank>,
    mmio_base: u64,
}

impl Cluster {
    pub fn new(id: u32, kind: ClusterKind) -> Self {
        Self {
            id,
            kind,
            bank: Arc::new(RegisterBank::new(T8030_CLUSTER_REGISTERS)),
            mmio_base: CPM_IMPL_REG_BASE + IMPL_WINDOW_SIZE * u64::from(id),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    pub fn mmio_base(&self) -> u64 {
        self.mmio_base
    }

    pub fn window(&self) -> Arc<dyn MmioDevice> {
        Arc::new(ImplWindow::new(format!("Cluster {}", self.id), self.bank.clone()))
    }
}

/// The two T8030 clusters: E at the CPM base, P one window above
pub fn t8030_clusters() -> [Cluster; 2] {
    [Cluster::new(0, ClusterKind::E), Cluster::new(1, ClusterKind::P)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_windows() {
        let cores = create_cores(MAX_CPU).unwrap();
        for (i, core) in cores.iter().enumerate() {
            assert_eq!(core.id(), i as u32);
            assert_eq!(core.mmio_base(), 0x2_1005_0000 + 0x10000 * i as u64);
        }
    }

    #[test]
    fn test_initial_power_state() {
        let cores = create_cores(3).unwrap();
        assert!(cores[0].is_powered_on());
        assert!(!cores[1].is_powered_on());
        assert!(!cores[2].is_powered_on());
    }

    #[test]
    fn test_core_count_bounds() {
        assert!(matches!(create_cores(0), Err(CpuError::TooManyCores { .. })));
        assert!(matches!(
            create_cores(MAX_CPU + 1),
            Err(CpuError::TooManyCores { requested: 7, max: 6 })
        ));
        assert!(matches!(CpuCore::new(6), Err(CpuError::InvalidCoreId(6))));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let core = CpuCore::new(1).unwrap();
        core.set_powered_on(true);
        core.set_entry(0x4700_8000, 0x4821_0000);

        core.reset();
        assert!(!core.is_powered_on());
        assert_eq!(core.entry_state(), EntryState::default());
    }

    #[test]
    fn test_reset_keeps_registers() {
        let core = CpuCore::new(0).unwrap();
        let apctl = core.bank().index_by_name("APCTL_EL1").unwrap();
        core.bank().write_index(0, 0x55);
        core.bank().write_index(apctl, 0x10);

        core.reset();
        assert!(core.is_powered_on());
        assert_eq!(core.bank().read_index(0), Some(0x55));
        assert_eq!(core.bank().read_named("APCTL_EL1"), Some(0x10));
    }

    #[test]
    fn test_clusters() {
        let [e, p] = t8030_clusters();
        assert_eq!(e.kind() as u8, 0x45);
        assert_eq!(e.mmio_base(), 0x2_10E4_0000);
        assert_eq!(p.kind() as u8, 0x50);
        assert_eq!(p.mmio_base(), 0x2_10E5_0000);
        assert_eq!(p.kind().to_string(), "P");

        // No named registers: every access reads zero
        let window = e.window();
        window.write(0x0, 0x1234, 8);
        assert_eq!(window.read(0x0, 8), 0);
    }
}
