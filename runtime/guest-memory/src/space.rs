//! Guest address space - RAM and MMIO region management
//!
//! Regions are kept sorted by base address and may not overlap. RAM pages
//! are allocated on first write; reads of untouched RAM return zeroes.

use pages::PageStore;
use std::sync::Arc;

use crate::{GuestMemory, MemoryError, MmioDevice, Result};

/// Page size (4KB)
pub const PAGE_SIZE: u64 = 0x1000;

enum Backing {
    Ram,
    Mmio(Arc<dyn MmioDevice>),
}

struct Region {
    name: String,
    base: u64,
    size: u64,
    backing: Backing,
}

impl Region {
    fn end(&self) -> u64 {
        self.base + self.size
    }

    fn covers(&self, addr: u64, len: u64) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base && end <= self.end(),
            None => false,
        }
    }
}

/// Read-only description of a mapped region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub is_mmio: bool,
}

/// Sparse guest physical address space
#[derive(Default)]
pub struct GuestAddressSpace {
    /// Regions sorted by base address
    regions: Vec<Region>,

    /// Lazily allocated RAM pages
    pages: PageStore,
}

impl GuestAddressSpace {
    /// Create an empty address space
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_region(&mut self, name: &str, base: u64, size: u64, backing: Backing) -> Result<()> {
        if size == 0 {
            return Err(MemoryError::ZeroSized {
                name: name.to_string(),
            });
        }

        let end = base.checked_add(size).ok_or_else(|| MemoryError::Overflow {
            name: name.to_string(),
            base,
            size,
        })?;

        if let Some(existing) = self
            .regions
            .iter()
            .find(|r| base < r.end() && r.base < end)
        {
            return Err(MemoryError::Overlap {
                name: name.to_string(),
                base,
                size,
                existing: existing.name.clone(),
            });
        }

        log::debug!(
            "Mapping {} '{}' at {:#x} - {:#x}",
            match backing {
                Backing::Ram => "RAM",
                Backing::Mmio(_) => "MMIO",
            },
            name,
            base,
            end
        );

        let index = self.regions.partition_point(|r| r.base < base);
        self.regions.insert(
            index,
            Region {
                name: name.to_string(),
                base,
                size,
                backing,
            },
        );
        Ok(())
    }

    /// Map a device model over `[base, base + size)`
    pub fn map_mmio(
        &mut self,
        name: &str,
        base: u64,
        size: u64,
        device: Arc<dyn MmioDevice>,
    ) -> Result<()> {
        self.insert_region(name, base, size, Backing::Mmio(device))
    }

    fn find(&self, addr: u64, len: u64) -> Option<&Region> {
        let index = self.regions.partition_point(|r| r.base <= addr);
        let region = self.regions.get(index.checked_sub(1)?)?;
        region.covers(addr, len).then_some(region)
    }

    fn ram_region(&self, addr: u64, len: usize) -> Result<&Region> {
        match self.find(addr, len as u64) {
            Some(region) if matches!(region.backing, Backing::Ram) => Ok(region),
            _ => Err(MemoryError::Unmapped { addr, len }),
        }
    }

    fn mmio_region(&self, addr: u64, size: u32) -> Result<(&Region, &Arc<dyn MmioDevice>)> {
        match self.find(addr, u64::from(size)) {
            Some(region) => match &region.backing {
                Backing::Mmio(device) => Ok((region, device)),
                Backing::Ram => Err(MemoryError::Unmapped {
                    addr,
                    len: size as usize,
                }),
            },
            None => Err(MemoryError::Unmapped {
                addr,
                len: size as usize,
            }),
        }
    }

    /// Dispatch a load to the device mapped at `addr`
    pub fn mmio_read(&self, addr: u64, size: u32) -> Result<u64> {
        let (region, device) = self.mmio_region(addr, size)?;
        Ok(device.read(addr - region.base, size))
    }

    /// Dispatch a store to the device mapped at `addr`
    pub fn mmio_write(&self, addr: u64, value: u64, size: u32) -> Result<()> {
        let (region, device) = self.mmio_region(addr, size)?;
        device.write(addr - region.base, value, size);
        Ok(())
    }

    /// Iterate over all mapped regions in address order
    pub fn regions(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        self.regions.iter().map(|r| RegionInfo {
            name: r.name.clone(),
            base: r.base,
            size: r.size,
            is_mmio: matches!(r.backing, Backing::Mmio(_)),
        })
    }

    /// Look up a region by name
    pub fn region(&self, name: &str) -> Option<RegionInfo> {
        self.regions().find(|r| r.name == name)
    }

    /// Bytes of RAM actually materialised so far
    pub fn resident_bytes(&self) -> u64 {
        self.pages.len() as u64 * PAGE_SIZE
    }
}

impl GuestMemory for GuestAddressSpace {
    fn add_ram(&mut self, name: &str, base: u64, size: u64) -> Result<()> {
        self.insert_region(name, base, size, Backing::Ram)
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.ram_region(addr, data.len())?;
        self.pages.write(addr, data);
        Ok(())
    }

    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.ram_region(addr, buf.len())?;
        self.pages.read(addr, buf);
        Ok(())
    }
}

mod pages {
    use super::PAGE_SIZE;
    use std::collections::HashMap;

    const PAGE_BYTES: usize = PAGE_SIZE as usize;

    /// Page-granular sparse byte store
    #[derive(Default)]
    pub(super) struct PageStore {
        pages: HashMap<u64, Box<[u8; PAGE_BYTES]>>,
    }

    impl PageStore {
        pub(super) fn len(&self) -> usize {
            self.pages.len()
        }

        pub(super) fn write(&mut self, addr: u64, data: &[u8]) {
            let mut done = 0;
            while done < data.len() {
                let cur = addr + done as u64;
                let page = cur & !(PAGE_SIZE - 1);
                let in_page = (cur - page) as usize;
                let chunk = (PAGE_BYTES - in_page).min(data.len() - done);

                let frame = self
                    .pages
                    .entry(page)
                    .or_insert_with(|| Box::new([0u8; PAGE_BYTES]));
                frame[in_page..in_page + chunk].copy_from_slice(&data[done..done + chunk]);
                done += chunk;
            }
        }

        pub(super) fn read(&self, addr: u64, buf: &mut [u8]) {
            let mut done = 0;
            while done < buf.len() {
                let cur = addr + done as u64;
                let page = cur & !(PAGE_SIZE - 1);
                let in_page = (cur - page) as usize;
                let chunk = (PAGE_BYTES - in_page).min(buf.len() - done);

                match self.pages.get(&page) {
                    Some(frame) => {
                        buf[done..done + chunk].copy_from_slice(&frame[in_page..in_page + chunk])
                    }
                    None => buf[done..done + chunk].fill(0),
                }
                done += chunk;
            }
        }
    }
}
