//! Collaborator interfaces used by the layout builder
//!
//! The builder never touches host files or image formats itself. Each
//! collaborator receives the destination it must use and reports back what
//! it placed, so the builder stays the single owner of placement decisions.

use std::path::Path;

use t8030_guest_memory::GuestMemory;

use crate::{KernelSlide, Result};

/// Virtual extent of a kernel image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelImageInfo {
    /// Kernel virtual base (1GB aligned)
    pub virt_base: u64,

    /// Lowest virtual address of any loadable segment
    pub low: u64,

    /// Highest virtual address (exclusive) of any loadable segment
    pub high: u64,

    /// Virtual entry point
    pub entry: u64,
}

/// Reports the virtual extent of a kernel image without loading it
pub trait ImageInspector {
    fn describe(&self, path: &Path) -> Result<KernelImageInfo>;
}

/// Copies a host file verbatim into guest memory
pub trait RawFileLoader {
    /// Back a RAM region named `region` at `dest` and copy the file into it
    ///
    /// # Returns
    /// The file size in bytes. An empty file maps nothing and returns 0.
    ///
    /// # Errors
    /// - `MissingResource` if the file does not exist
    /// - `SizeExceeded` if the file is larger than `bound`
    fn load(
        &self,
        path: &Path,
        region: &str,
        dest: u64,
        bound: u64,
        memory: &mut dyn GuestMemory,
    ) -> Result<u64>;
}

/// Places the loadable segments of a kernel image into guest memory
pub trait KernelLoader {
    /// Load the image described by `image` using `slide` for translation
    ///
    /// # Returns
    /// The physical address of the kernel entry point
    fn load(
        &self,
        path: &Path,
        slide: &KernelSlide,
        image: &KernelImageInfo,
        memory: &mut dyn GuestMemory,
    ) -> Result<u64>;
}

/// Physical address range, `size == 0` when absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysRange {
    pub pa: u64,
    pub size: u64,
}

impl PhysRange {
    pub fn new(pa: u64, size: u64) -> Self {
        Self { pa, size }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Memory facts the device tree must advertise to the kernel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootMemoryMap {
    pub dram_base: u64,
    pub dram_size: u64,
    pub ramdisk: PhysRange,
    pub trust_cache: PhysRange,
}

/// Produces the flattened device tree once the memory map is known
pub trait DeviceTreeEncoder {
    /// Apply `map` to the tree and return the encoded blob
    ///
    /// The builder enforces the size limit and performs the guest write.
    fn encode(&mut self, map: &BootMemoryMap) -> Result<Vec<u8>>;
}
