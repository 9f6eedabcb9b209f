//! Layout Builder - places every boot blob in guest physical memory
//!
//! # Region order
//! ```text
//! PHYS_BASE  ┌──────────────────────┐
//!            │ RawKernelImage 32MB  │
//!            ├──────────────────────┤
//!            │ TrustCache           │
//!            ├──────────────────────┤ align_down(vtop(kernel low))
//!            │ KernelSections       │
//!            ├──────────────────────┤ align(vtop(kernel high))
//!            │ DeviceTreeBlob 256KB │
//!            ├──────────────────────┤
//!            │ Ramdisk (optional)   │
//!            ├──────────────────────┤
//!            │ BootArgs             │
//!            ├──────────────────────┤ extra_data_pa
//!            │ ExtraScratchData     │ (framebuffer)
//!            ├──────────────────────┤ top_of_kernel_data
//!            │ free DRAM            │
//!            └──────────────────────┘
//! ```

use std::fmt;
use std::path::PathBuf;

use t8030_guest_memory::{align_down, GuestMemory};

use crate::bootargs::{BootArgs, VideoBootArgs, BOOT_ARGS_SIZE, BOOT_LINE_LENGTH, FRAMEBUFFER_SIZE};
use crate::loader::{
    BootMemoryMap, DeviceTreeEncoder, ImageInspector, KernelImageInfo, KernelLoader, PhysRange,
    RawFileLoader,
};
use crate::patch::{apply_patches, PatchEntry, T8030_KERNEL_PATCHES};
use crate::{align_64k_high, BootError, KernelSlide, RegionAllocator, Result};

/// Base of guest DRAM
pub const T8030_PHYS_BASE: u64 = 0x4000_0000;

/// Window kept free at the start of DRAM for the raw kernel image
pub const RAW_KERNEL_WINDOW_SIZE: u64 = 0x200_0000;

/// Space reserved for the encoded device tree
pub const T8030_MAX_DEVICETREE_SIZE: u64 = 0x40000;

pub const TRUSTCACHE_MAX_SIZE: u64 = 0x100_0000;
pub const RAMDISK_MAX_SIZE: u64 = 0x4000_0000;

/// Scratch region size, sized for the boot framebuffer
pub const EXTRA_DATA_SIZE: u64 = FRAMEBUFFER_SIZE;

/// Kind of a placed boot region, in placement order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootRegionKind {
    RawKernelImage,
    TrustCache,
    KernelSections,
    DeviceTreeBlob,
    Ramdisk,
    BootArgs,
    ExtraScratchData,
}

impl fmt::Display for BootRegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RawKernelImage => "raw kernel image",
            Self::TrustCache => "trust cache",
            Self::KernelSections => "kernel sections",
            Self::DeviceTreeBlob => "device tree",
            Self::Ramdisk => "ramdisk",
            Self::BootArgs => "boot args",
            Self::ExtraScratchData => "extra scratch data",
        };
        f.write_str(name)
    }
}

/// A placed region of guest physical memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRegion {
    pub kind: BootRegionKind,
    pub base: u64,
    pub size: u64,
}

impl BootRegion {
    pub fn new(kind: BootRegionKind, base: u64, size: u64) -> Self {
        Self { kind, base, size }
    }

    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    pub fn overlaps(&self, other: &BootRegion) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Host files the layout loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSources {
    pub kernel: PathBuf,
    pub trust_cache: PathBuf,
    pub ramdisk: Option<PathBuf>,
}

/// Machine parameters that shape the layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutConfig {
    /// Total guest RAM in bytes
    pub ram_size: u64,

    /// Kernel command line
    pub cmdline: String,

    /// Describe a boot framebuffer in the boot args
    pub framebuffer: bool,
}

/// Collaborators the builder delegates file and format handling to
pub struct Collaborators<'a> {
    pub inspector: &'a dyn ImageInspector,
    pub raw_loader: &'a dyn RawFileLoader,
    pub kernel_loader: &'a dyn KernelLoader,
    pub device_tree: &'a mut dyn DeviceTreeEncoder,
}

/// Result of a successful layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootLayout {
    pub slide: KernelSlide,
    pub kernel: KernelImageInfo,

    /// Physical entry point of the kernel
    pub kernel_entry_pa: u64,

    pub trust_cache: PhysRange,
    pub ramdisk: PhysRange,

    pub dtb_pa: u64,
    pub dtb_va: u64,

    /// Encoded device tree size (not the reservation)
    pub dtb_size: u64,

    pub boot_args_pa: u64,
    pub extra_data_pa: u64,
    pub top_of_kernel_data_pa: u64,
    pub video: VideoBootArgs,

    /// Bytes of RAM charged to the kernel, device tree and boot args
    pub used_ram_for_blobs: u64,

    pub dram_base: u64,
    pub dram_size: u64,

    /// RAM left for the kernel, mapped at `extra_data_pa`
    pub free_ram: PhysRange,

    /// Every placed region in placement order
    pub regions: Vec<BootRegion>,
}

impl BootLayout {
    /// First region of the given kind
    pub fn region(&self, kind: BootRegionKind) -> Option<&BootRegion> {
        self.regions.iter().find(|r| r.kind == kind)
    }
}

/// Drives the fixed placement sequence
pub struct LayoutBuilder<'a> {
    sources: &'a BootSources,
    config: &'a LayoutConfig,
    patches: &'a [PatchEntry],
}

impl<'a> LayoutBuilder<'a> {
    /// Builder using the default T8030 kernel patch table
    pub fn new(sources: &'a BootSources, config: &'a LayoutConfig) -> Self {
        Self {
            sources,
            config,
            patches: T8030_KERNEL_PATCHES,
        }
    }

    /// Replace the kernel patch table
    pub fn with_patches(mut self, patches: &'a [PatchEntry]) -> Self {
        self.patches = patches;
        self
    }

    /// Place every boot blob and write it into `memory`
    ///
    /// # Arguments
    /// * `collab` - Image inspector, loaders and device-tree encoder
    /// * `memory` - Guest address space receiving the blobs
    ///
    /// # Returns
    /// The complete layout, including the region list and kernel entry
    ///
    /// # Errors
    /// Any collaborator error propagates unchanged. The builder itself fails
    /// with `CommandLineTooLong`, `KernelOverlap`, `RamExhausted`,
    /// `SizeExceeded` (device tree) or `AddressOverflow`.
    pub fn build(
        &self,
        collab: &mut Collaborators<'_>,
        memory: &mut dyn GuestMemory,
    ) -> Result<BootLayout> {
        if self.config.cmdline.len() >= BOOT_LINE_LENGTH {
            return Err(BootError::CommandLineTooLong {
                len: self.config.cmdline.len(),
                max: BOOT_LINE_LENGTH - 1,
            });
        }

        let kernel = collab.inspector.describe(&self.sources.kernel)?;
        if kernel.high < kernel.low || kernel.low < kernel.virt_base {
            return Err(BootError::InvalidImage(format!(
                "segment span {:#x} - {:#x} outside virtual base {:#x}",
                kernel.low, kernel.high, kernel.virt_base
            )));
        }
        let slide = KernelSlide::new(kernel.virt_base, T8030_PHYS_BASE);
        log::info!(
            "Kernel virt_base {:#x} phys_base {:#x}, span {:#x} - {:#x}",
            slide.virt_base,
            slide.phys_base,
            kernel.low,
            kernel.high
        );

        let mut alloc = RegionAllocator::with_region_alignment(T8030_PHYS_BASE);
        let mut regions = Vec::with_capacity(7);
        let mut used_ram_for_blobs: u64 = 0;

        // Raw kernel window
        let raw_base = alloc.reserve(RAW_KERNEL_WINDOW_SIZE)?;
        regions.push(BootRegion::new(
            BootRegionKind::RawKernelImage,
            raw_base,
            RAW_KERNEL_WINDOW_SIZE,
        ));

        // Trust cache
        let tc_pa = alloc.next_base()?;
        let tc_size = collab.raw_loader.load(
            &self.sources.trust_cache,
            "trustcache",
            tc_pa,
            TRUSTCACHE_MAX_SIZE,
            memory,
        )?;
        alloc.reserve(tc_size)?;
        // The device tree gets the loaded size, the region covers the reservation
        let trust_cache = PhysRange::new(tc_pa, tc_size);
        regions.push(BootRegion::new(
            BootRegionKind::TrustCache,
            tc_pa,
            alloc.aligned(tc_size)?,
        ));
        log::info!("Trust cache at {:#x} ({:#x} bytes)", tc_pa, tc_size);

        // Kernel
        let kernel_entry_pa =
            collab
                .kernel_loader
                .load(&self.sources.kernel, &slide, &kernel, memory)?;
        let kernel_start = slide.vtop(kernel.low)?;
        let kernel_end = align_64k_high(slide.vtop(kernel.high)?)?;
        if kernel_start < alloc.cursor() {
            return Err(BootError::KernelOverlap {
                start: kernel_start,
                end: kernel_end,
                cursor: alloc.cursor(),
            });
        }
        alloc.skip_to(kernel_end)?;
        let kernel_base = align_down(kernel_start, alloc.alignment());
        regions.push(BootRegion::new(
            BootRegionKind::KernelSections,
            kernel_base,
            kernel_end - kernel_base,
        ));
        used_ram_for_blobs = charge(used_ram_for_blobs, align_64k_high(kernel.high)? - kernel.low)?;
        log::info!(
            "Kernel loaded at {:#x} - {:#x}, entry {:#x}",
            kernel_start,
            kernel_end,
            kernel_entry_pa
        );

        apply_patches(self.patches, &slide, memory)?;

        // Device tree reservation
        let dtb_pa = alloc.reserve(T8030_MAX_DEVICETREE_SIZE)?;
        let dtb_va = slide.ptov(dtb_pa)?;
        regions.push(BootRegion::new(
            BootRegionKind::DeviceTreeBlob,
            dtb_pa,
            T8030_MAX_DEVICETREE_SIZE,
        ));
        used_ram_for_blobs = charge(used_ram_for_blobs, T8030_MAX_DEVICETREE_SIZE)?;

        // Ramdisk
        let ramdisk = match &self.sources.ramdisk {
            Some(path) => {
                let pa = alloc.next_base()?;
                let size = collab
                    .raw_loader
                    .load(path, "ramdisk", pa, RAMDISK_MAX_SIZE, memory)?;
                alloc.reserve(size)?;
                if size == 0 {
                    PhysRange::default()
                } else {
                    PhysRange::new(pa, alloc.aligned(size)?)
                }
            }
            None => PhysRange::default(),
        };
        if ramdisk.is_empty() {
            log::info!("No ramdisk");
        } else {
            regions.push(BootRegion::new(
                BootRegionKind::Ramdisk,
                ramdisk.pa,
                ramdisk.size,
            ));
            log::info!("Ramdisk at {:#x} ({:#x} bytes)", ramdisk.pa, ramdisk.size);
        }

        // Boot args
        let boot_args_span = alloc.aligned(BOOT_ARGS_SIZE as u64)?;
        let boot_args_pa = alloc.reserve(BOOT_ARGS_SIZE as u64)?;
        regions.push(BootRegion::new(
            BootRegionKind::BootArgs,
            boot_args_pa,
            boot_args_span,
        ));
        used_ram_for_blobs = charge(used_ram_for_blobs, boot_args_span)?;

        // Scratch data, framebuffer first
        let extra_data_pa = alloc.next_base()?;
        let video = if self.config.framebuffer {
            VideoBootArgs::framebuffer(extra_data_pa)
        } else {
            VideoBootArgs::default()
        };
        let extra_span = alloc.aligned(EXTRA_DATA_SIZE)?;
        alloc.reserve(EXTRA_DATA_SIZE)?;
        regions.push(BootRegion::new(
            BootRegionKind::ExtraScratchData,
            extra_data_pa,
            extra_span,
        ));
        let top_of_kernel_data_pa = alloc.cursor();

        // DRAM accounting
        let ram_size = self.config.ram_size;
        let remaining = ram_size
            .checked_sub(used_ram_for_blobs)
            .ok_or(BootError::RamExhausted {
                ram_size,
                required: used_ram_for_blobs,
            })?;
        if remaining < extra_span {
            return Err(BootError::RamExhausted {
                ram_size,
                required: used_ram_for_blobs.saturating_add(extra_span),
            });
        }
        let dram_base = T8030_PHYS_BASE;
        let dram_size = (extra_data_pa - T8030_PHYS_BASE)
            .checked_add(remaining)
            .ok_or(BootError::AddressOverflow("DRAM size"))?;
        log::info!(
            "Used {:#x} bytes for boot blobs, {:#x} remaining, DRAM size {:#x}",
            used_ram_for_blobs,
            remaining,
            dram_size
        );

        // Device tree
        let map = BootMemoryMap {
            dram_base,
            dram_size,
            ramdisk,
            trust_cache,
        };
        let blob = collab.device_tree.encode(&map)?;
        let dtb_size = blob.len() as u64;
        if dtb_size > T8030_MAX_DEVICETREE_SIZE {
            return Err(BootError::SizeExceeded {
                what: "device tree",
                size: dtb_size,
                max: T8030_MAX_DEVICETREE_SIZE,
            });
        }
        memory.add_ram("devicetree", dtb_pa, T8030_MAX_DEVICETREE_SIZE)?;
        memory.write(dtb_pa, &blob)?;
        log::info!("Device tree at {:#x} ({:#x} bytes)", dtb_pa, dtb_size);

        // Boot args
        let args = BootArgs {
            virt_base: slide.virt_base,
            phys_base: slide.phys_base,
            mem_size: dram_size,
            top_of_kernel_data: top_of_kernel_data_pa,
            video,
            machine_type: 0,
            device_tree_va: dtb_va,
            device_tree_length: dtb_size as u32,
            command_line: self.config.cmdline.clone(),
            boot_flags: 0,
            mem_size_actual: 0,
        };
        memory.add_ram("bootargs", boot_args_pa, boot_args_span)?;
        memory.write(boot_args_pa, &args.encode()?)?;
        log::info!("Boot args at {:#x}", boot_args_pa);

        // Remaining DRAM, starting with the scratch region
        let free_ram = PhysRange::new(extra_data_pa, remaining);
        memory.add_ram("ram", free_ram.pa, free_ram.size)?;

        Ok(BootLayout {
            slide,
            kernel,
            kernel_entry_pa,
            trust_cache,
            ramdisk,
            dtb_pa,
            dtb_va,
            dtb_size,
            boot_args_pa,
            extra_data_pa,
            top_of_kernel_data_pa,
            video,
            used_ram_for_blobs,
            dram_base,
            dram_size,
            free_ram,
            regions,
        })
    }
}

fn charge(used: u64, size: u64) -> Result<u64> {
    used.checked_add(size)
        .ok_or(BootError::AddressOverflow("boot blob accounting"))
}
