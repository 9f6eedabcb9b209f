//! T8030 CPU Model - cores, clusters and implementation-defined registers
//!
//! # Purpose
//! Holds the state early XNU boot expects to find on Apple cores: the
//! implementation-defined system registers, per-core and per-cluster
//! register windows in the physical address space, power state and the
//! boot entry state primed by the reset handler.
//!
//! # Integration Points
//! - Depends on: guest-memory (MMIO device interface)
//! - Provides to: machine (core/cluster creation and window mapping)
//!
//! # Architecture
//! Each core owns one [`RegisterBank`] behind a `spin::Mutex`. Two adapters
//! share it: [`SysRegPath`] for `mrs`/`msr` by encoding and [`ImplWindow`]
//! for loads and stores through the core's MMIO window.
//!
//! # Testing Strategy
//! - Unit tests: register table, both access paths, reset behaviour
//! - Integration tests: concurrent access through both paths
//! - Benchmarks: MMIO path throughput

mod bank;
mod sysreg;
mod topology;

pub use crate::bank::{ImplWindow, RegisterBank, SysRegPath, MMIO_REG_STRIDE};
pub use crate::sysreg::{
    SysRegAccess, SysRegDef, SysRegKey, T8030_CLUSTER_REGISTERS, T8030_CORE_REGISTERS,
};
pub use crate::topology::{
    create_cores, t8030_clusters, Cluster, ClusterKind, CpuCore, EntryState,
};

use thiserror::Error;

/// Maximum number of application cores
pub const MAX_CPU: usize = 6;

/// Base of the per-core implementation register windows
pub const CPU_IMPL_REG_BASE: u64 = 0x2_1005_0000;

/// Base of the per-cluster power manager windows
pub const CPM_IMPL_REG_BASE: u64 = 0x2_10E4_0000;

/// Size of each implementation window
pub const IMPL_WINDOW_SIZE: u64 = 0x10000;

/// Error types for CPU model construction
///
/// Register accesses never fail; only topology construction can.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("Requested {requested} cores, supported 1..={max}")]
    TooManyCores { requested: usize, max: usize },

    #[error("Invalid core id {0}")]
    InvalidCoreId(u32),
}

pub type Result<T> = core::result::Result<T, CpuError>;
