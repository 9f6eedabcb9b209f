//! Boot Layout - Guest memory layout builder for booting XNU on T8030
//!
//! # Purpose
//! Places every boot blob (trust cache, kernel, device tree, ramdisk, boot
//! arguments, scratch data) into guest physical memory in a fixed,
//! 64KB-aligned, non-overlapping order, patches the loaded kernel, and
//! computes the DRAM size handed to the kernel.
//!
//! # Integration Points
//! - Depends on: guest-memory (write primitive)
//! - Provides to: machine (layout construction)
//! - Collaborators: image inspector, raw-file loader, kernel loader and
//!   device-tree encoder, all supplied through the traits in [`loader`]
//!
//! # Architecture
//! A single [`RegionAllocator`] cursor hands out placements. The
//! [`LayoutBuilder`] drives the fixed step sequence and threads a
//! [`KernelSlide`] through every step instead of keeping global bases.
//!
//! # Testing Strategy
//! - Unit tests: allocator arithmetic, boot-args encoding, patch table
//! - Integration tests: complete layouts against fake collaborators

mod allocator;
mod bootargs;
mod layout;
pub mod loader;
mod patch;
mod slide;

pub use allocator::RegionAllocator;
pub use bootargs::{
    BootArgs, VideoBootArgs, BOOT_ARGS_REVISION, BOOT_ARGS_SIZE, BOOT_ARGS_VERSION,
    BOOT_LINE_LENGTH, FRAMEBUFFER_DEPTH, FRAMEBUFFER_HEIGHT, FRAMEBUFFER_SIZE, FRAMEBUFFER_WIDTH,
};
pub use layout::{
    BootLayout, BootRegion, BootRegionKind, BootSources, Collaborators, LayoutBuilder,
    LayoutConfig, EXTRA_DATA_SIZE, RAMDISK_MAX_SIZE, RAW_KERNEL_WINDOW_SIZE,
    T8030_MAX_DEVICETREE_SIZE, T8030_PHYS_BASE, TRUSTCACHE_MAX_SIZE,
};
pub use loader::{
    BootMemoryMap, DeviceTreeEncoder, ImageInspector, KernelImageInfo, KernelLoader, PhysRange,
    RawFileLoader,
};
pub use patch::{apply_patches, PatchEntry, NOP_INST, RET_INST, T8030_KERNEL_PATCHES};
pub use slide::KernelSlide;

use std::path::PathBuf;
use t8030_guest_memory::MemoryError;
use thiserror::Error;

/// Alignment used for every boot region (64KB)
pub const REGION_ALIGN: u64 = 0x10000;

/// Error types for layout construction
///
/// Every variant is fatal: later layout steps depend on earlier ones, so the
/// machine never retries or recovers.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("Missing resource: {0}")]
    MissingResource(String),

    #[error("{what} is {size:#x} bytes, exceeds maximum {max:#x}")]
    SizeExceeded {
        what: &'static str,
        size: u64,
        max: u64,
    },

    #[error("Guest address space write failed: {0}")]
    AddressSpaceWrite(#[from] MemoryError),

    #[error("Address arithmetic overflow: {0}")]
    AddressOverflow(&'static str),

    #[error("Cursor at {cursor:#x} cannot move back to {target:#x}")]
    CursorRewind { cursor: u64, target: u64 },

    #[error("Kernel span {start:#x} - {end:#x} overlaps placed regions (cursor at {cursor:#x})")]
    KernelOverlap { start: u64, end: u64, cursor: u64 },

    #[error("Guest RAM of {ram_size:#x} bytes cannot hold {required:#x} bytes of boot data")]
    RamExhausted { ram_size: u64, required: u64 },

    #[error("Alignment {0:#x} is not a power of two")]
    InvalidAlignment(u64),

    #[error("Kernel command line is {len} bytes, limit is {max}")]
    CommandLineTooLong { len: usize, max: usize },

    #[error("Invalid kernel image: {0}")]
    InvalidImage(String),

    #[error("Invalid device tree: {0}")]
    InvalidDeviceTree(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = core::result::Result<T, BootError>;

/// Round `size` up to the region alignment
pub fn align_64k_high(size: u64) -> Result<u64> {
    t8030_guest_memory::align_up(size, REGION_ALIGN)
        .ok_or(BootError::AddressOverflow("64KB alignment"))
}
