//! T8030 Machine - boot orchestration for the emulated SoC
//!
//! # Purpose
//! Assembles a bootable T8030 guest from a configuration: guest address
//! space, cores and clusters, the boot image layout, the console UART and
//! the reset handler that primes the boot core.
//!
//! # Integration Points
//! - Depends on: guest-memory, boot-layout, cpu-model, devicetree
//! - Provides to: t8030-boot (command-line front end)
//!
//! # Architecture
//! ```text
//! MachineConfig (TOML)
//!        ↓
//! Machine::new
//!   ├─ device tree   → SoC base
//!   ├─ cores/clusters → implementation windows
//!   ├─ LayoutBuilder → trust cache, kernel, device tree, ramdisk, boot args
//!   ├─ S3cUart       → boot console
//!   └─ reset handler → core 0 entry state
//! ```
//!
//! # Testing Strategy
//! - Unit tests: configuration parsing, UART registers, host loaders
//! - Integration tests: full machine construction with fake kernel loaders

pub mod config;
pub mod host;
mod machine;
pub mod uart;

pub use config::MachineConfig;
pub use host::{HostFileLoader, MachOLoader};
pub use machine::{BootLoaders, Machine, ResetHandler};
pub use uart::S3cUart;

use std::path::PathBuf;

use t8030_boot_layout::BootError;
use t8030_cpu::CpuError;
use t8030_devicetree::DeviceTreeError;
use t8030_guest_memory::MemoryError;
use thiserror::Error;

/// Error types for machine construction
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing resource: {0}")]
    MissingResource(String),

    #[error("Boot layout failed: {0}")]
    Boot(#[from] BootError),

    #[error("Device tree error: {0}")]
    DeviceTree(#[from] DeviceTreeError),

    #[error("CPU setup failed: {0}")]
    Cpu(#[from] CpuError),

    #[error("Guest memory error: {0}")]
    Memory(#[from] MemoryError),
}

pub type Result<T> = core::result::Result<T, MachineError>;
