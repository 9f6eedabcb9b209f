//! Host-side loaders
//!
//! Concrete collaborators for the layout builder: a Mach-O kernel loader
//! built on goblin and a raw file loader that maps host files with memmap2.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;

use goblin::mach::MachO;
use memmap2::Mmap;
use t8030_boot_layout::{
    align_64k_high, BootError, ImageInspector, KernelImageInfo, KernelLoader, KernelSlide,
    RawFileLoader, Result,
};
use t8030_guest_memory::GuestMemory;

/// Kernel virtual base granule (1GB)
const VIRT_BASE_MASK: u64 = 0x3FFF_FFFF;

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> BootError {
    if source.kind() == ErrorKind::NotFound {
        BootError::MissingResource(path.display().to_string())
    } else {
        BootError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn parse_macho<'a>(path: &Path, data: &'a [u8]) -> Result<MachO<'a>> {
    MachO::parse(data, 0)
        .map_err(|e| BootError::InvalidImage(format!("{}: {}", path.display(), e)))
}

/// Segments that occupy guest memory
fn is_loadable(name: &str, vmsize: u64) -> bool {
    vmsize != 0 && name != "__PAGEZERO"
}

/// Loads a Mach-O kernelcache segment by segment
#[derive(Debug, Default, Clone, Copy)]
pub struct MachOLoader;

impl MachOLoader {
    pub fn new() -> Self {
        Self
    }

    fn describe_macho(path: &Path, macho: &MachO<'_>) -> Result<KernelImageInfo> {
        let mut low = u64::MAX;
        let mut high = 0u64;

        for segment in macho.segments.iter() {
            let name = segment.name().unwrap_or("");
            if !is_loadable(name, segment.vmsize) {
                continue;
            }
            let end = segment
                .vmaddr
                .checked_add(segment.vmsize)
                .ok_or(BootError::AddressOverflow("segment end"))?;
            low = low.min(segment.vmaddr);
            high = high.max(end);
        }

        if low == u64::MAX {
            return Err(BootError::InvalidImage(format!(
                "{}: no loadable segments",
                path.display()
            )));
        }

        Ok(KernelImageInfo {
            virt_base: low & !VIRT_BASE_MASK,
            low,
            high,
            entry: macho.entry,
        })
    }
}

impl ImageInspector for MachOLoader {
    fn describe(&self, path: &Path) -> Result<KernelImageInfo> {
        let data = read_file(path)?;
        let macho = parse_macho(path, &data)?;
        Self::describe_macho(path, &macho)
    }
}

impl KernelLoader for MachOLoader {
    fn load(
        &self,
        path: &Path,
        slide: &KernelSlide,
        image: &KernelImageInfo,
        memory: &mut dyn GuestMemory,
    ) -> Result<u64> {
        let data = read_file(path)?;
        let macho = parse_macho(path, &data)?;

        let base = slide.vtop(image.low)?;
        let end = align_64k_high(slide.vtop(image.high)?)?;
        memory.add_ram("kernel", base, end - base)?;

        for segment in macho.segments.iter() {
            let name = segment.name().unwrap_or("");
            if !is_loadable(name, segment.vmsize) {
                continue;
            }

            let pa = slide.vtop(segment.vmaddr)?;
            let len = segment.data.len().min(segment.vmsize as usize);
            memory.write(pa, &segment.data[..len])?;
            log::debug!(
                "Loaded segment {} at {:#x} ({:#x} file bytes, {:#x} vm bytes)",
                name,
                pa,
                len,
                segment.vmsize
            );
        }

        let entry_pa = slide.vtop(image.entry)?;
        log::info!("Kernel {} entry {:#x}", path.display(), entry_pa);
        Ok(entry_pa)
    }
}

/// Copies host files into guest RAM through a read-only mapping
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFileLoader;

impl HostFileLoader {
    pub fn new() -> Self {
        Self
    }
}

impl RawFileLoader for HostFileLoader {
    fn load(
        &self,
        path: &Path,
        region: &str,
        dest: u64,
        bound: u64,
        memory: &mut dyn GuestMemory,
    ) -> Result<u64> {
        let file = File::open(path).map_err(|e| io_error(path, e))?;
        let size = file.metadata().map_err(|e| io_error(path, e))?.len();

        if size > bound {
            return Err(BootError::SizeExceeded {
                what: "file",
                size,
                max: bound,
            });
        }
        if size == 0 {
            log::warn!("{} is empty, nothing mapped", path.display());
            return Ok(0);
        }

        // SAFETY: the mapping is read-only and dropped before returning; the
        // file is not modified by this process while mapped.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| io_error(path, e))?;

        memory.add_ram(region, dest, align_64k_high(size)?)?;
        memory.write(dest, &map)?;
        log::info!(
            "Loaded {} at {:#x} ({:#x} bytes)",
            path.display(),
            dest,
            size
        );
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use t8030_guest_memory::GuestAddressSpace;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "t8030-host-{}-{}",
            std::process::id(),
            name
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_raw_file_loaded() {
        let path = temp_file("blob", &[0xA5; 100]);
        let mut memory = GuestAddressSpace::new();

        let size = HostFileLoader::new()
            .load(&path, "trustcache", 0x4200_0000, 0x1000, &mut memory)
            .unwrap();
        assert_eq!(size, 100);

        let region = memory.region("trustcache").unwrap();
        assert_eq!((region.base, region.size), (0x4200_0000, 0x10000));
        let mut buf = [0u8; 101];
        memory.read(0x4200_0000, &mut buf).unwrap();
        assert!(buf[..100].iter().all(|&b| b == 0xA5));
        assert_eq!(buf[100], 0);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_raw_file_bound() {
        let path = temp_file("big", &[0u8; 64]);
        let mut memory = GuestAddressSpace::new();

        let result = HostFileLoader::new().load(&path, "ramdisk", 0x4000_0000, 63, &mut memory);
        assert!(matches!(
            result,
            Err(BootError::SizeExceeded { size: 64, max: 63, .. })
        ));
        assert!(memory.region("ramdisk").is_none());

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_raw_file_empty() {
        let path = temp_file("empty", &[]);
        let mut memory = GuestAddressSpace::new();

        let size = HostFileLoader::new()
            .load(&path, "ramdisk", 0x4000_0000, 0x1000, &mut memory)
            .unwrap();
        assert_eq!(size, 0);
        assert_eq!(memory.regions().count(), 0);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_raw_file_missing() {
        let path = std::env::temp_dir().join("t8030-host-does-not-exist");
        let mut memory = GuestAddressSpace::new();

        let result = HostFileLoader::new().load(&path, "ramdisk", 0x4000_0000, 0x1000, &mut memory);
        assert!(matches!(result, Err(BootError::MissingResource(_))));
    }

    #[test]
    fn test_macho_rejects_garbage() {
        let path = temp_file("garbage", b"definitely not a kernelcache");
        let result = MachOLoader::new().describe(&path);
        assert!(matches!(result, Err(BootError::InvalidImage(_))));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_macho_missing() {
        let path = std::env::temp_dir().join("t8030-host-no-kernel");
        assert!(matches!(
            MachOLoader::new().describe(&path),
            Err(BootError::MissingResource(_))
        ));
    }

    fn segment(name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64) -> Vec<u8> {
        let mut cmd = Vec::new();
        cmd.extend_from_slice(&0x19u32.to_le_bytes()); // LC_SEGMENT_64
        cmd.extend_from_slice(&72u32.to_le_bytes());
        let mut segname = [0u8; 16];
        segname[..name.len()].copy_from_slice(name.as_bytes());
        cmd.extend_from_slice(&segname);
        for v in [vmaddr, vmsize, fileoff, filesize] {
            cmd.extend_from_slice(&v.to_le_bytes());
        }
        for v in [7u32, 5, 0, 0] {
            cmd.extend_from_slice(&v.to_le_bytes());
        }
        cmd
    }

    /// Minimal arm64 Mach-O with __PAGEZERO, __TEXT and a partly file-backed __DATA
    fn tiny_kernel() -> Vec<u8> {
        let mut cmds = Vec::new();
        cmds.extend(segment("__PAGEZERO", 0, 0x4000, 0, 0));
        cmds.extend(segment("__TEXT", 0xFFFF_FFF0_0700_4000, 0x4000, 0x1000, 0x10));
        cmds.extend(segment("__DATA", 0xFFFF_FFF0_0700_8000, 0x8000, 0x1010, 8));
        cmds.extend_from_slice(&0x8000_0028u32.to_le_bytes()); // LC_MAIN
        cmds.extend_from_slice(&24u32.to_le_bytes());
        cmds.extend_from_slice(&0xFFFF_FFF0_0700_4008u64.to_le_bytes());
        cmds.extend_from_slice(&0u64.to_le_bytes());

        let mut image = Vec::new();
        for v in [0xFEED_FACFu32, 0x0100_000C, 0, 2, 4, cmds.len() as u32, 0, 0] {
            image.extend_from_slice(&v.to_le_bytes());
        }
        image.extend(cmds);
        image.resize(0x1000, 0);
        image.extend_from_slice(&[0x11; 0x10]);
        image.extend_from_slice(&[0x22; 8]);
        image
    }

    #[test]
    fn test_macho_describe_and_load() {
        let path = temp_file("kernel", &tiny_kernel());
        let loader = MachOLoader::new();

        let info = loader.describe(&path).unwrap();
        assert_eq!(info.virt_base, 0xFFFF_FFF0_0000_0000);
        assert_eq!(info.low, 0xFFFF_FFF0_0700_4000);
        assert_eq!(info.high, 0xFFFF_FFF0_0701_0000);
        assert_eq!(info.entry, 0xFFFF_FFF0_0700_4008);

        let slide = KernelSlide::new(info.virt_base, 0x4000_0000);
        let mut memory = GuestAddressSpace::new();
        let entry = KernelLoader::load(&loader, &path, &slide, &info, &mut memory).unwrap();
        assert_eq!(entry, 0x4700_4008);

        let region = memory.region("kernel").unwrap();
        assert_eq!((region.base, region.size), (0x4700_4000, 0xC000));

        let mut text = [0u8; 0x11];
        memory.read(0x4700_4000, &mut text).unwrap();
        assert!(text[..0x10].iter().all(|&b| b == 0x11));
        assert_eq!(text[0x10], 0);

        let mut data = [0u8; 16];
        memory.read(0x4700_8000, &mut data).unwrap();
        assert_eq!(&data[..8], &[0x22; 8]);
        assert_eq!(&data[8..], &[0u8; 8]);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_loadable_segments() {
        assert!(!is_loadable("__PAGEZERO", 0x1000));
        assert!(!is_loadable("__TEXT", 0));
        assert!(is_loadable("__TEXT", 0x4000));
    }
}
