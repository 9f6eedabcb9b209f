//! Region Allocator - monotonic placement cursor for boot regions
//!
//! The cursor never moves backwards and every reservation consumes its full
//! aligned size, so two reservations can never overlap.

use crate::{BootError, Result, REGION_ALIGN};

/// Bump allocator over guest physical addresses
#[derive(Debug, Clone)]
pub struct RegionAllocator {
    /// Next free physical address
    cursor: u64,

    /// Power-of-two alignment applied to bases and sizes
    alignment: u64,
}

impl RegionAllocator {
    /// Create an allocator starting at `base`
    ///
    /// # Errors
    /// Returns `InvalidAlignment` if `alignment` is not a power of two
    pub fn new(base: u64, alignment: u64) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(BootError::InvalidAlignment(alignment));
        }

        Ok(Self {
            cursor: base,
            alignment,
        })
    }

    /// Create an allocator using the 64KB region alignment
    pub fn with_region_alignment(base: u64) -> Self {
        Self {
            cursor: base,
            alignment: REGION_ALIGN,
        }
    }

    /// Current cursor position
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Round `size` up to the allocator alignment
    pub fn aligned(&self, size: u64) -> Result<u64> {
        t8030_guest_memory::align_up(size, self.alignment)
            .ok_or(BootError::AddressOverflow("region size alignment"))
    }

    /// Base address the next reservation will return
    pub fn next_base(&self) -> Result<u64> {
        self.aligned(self.cursor)
    }

    /// Reserve `size` bytes and return the region base
    ///
    /// The cursor ends up at `base + align(size)`, so a zero-sized
    /// reservation only aligns the cursor.
    ///
    /// # Errors
    /// Returns `AddressOverflow` if the region would wrap the address space
    pub fn reserve(&mut self, size: u64) -> Result<u64> {
        let base = self.next_base()?;
        let span = self.aligned(size)?;
        self.cursor = base
            .checked_add(span)
            .ok_or(BootError::AddressOverflow("region end"))?;

        log::debug!(
            "Reserved {:#x} bytes at {:#x} (cursor now {:#x})",
            span,
            base,
            self.cursor
        );
        Ok(base)
    }

    /// Move the cursor forward to `target`
    ///
    /// Used when a collaborator dictates where a region ends (the loaded
    /// kernel span).
    ///
    /// # Errors
    /// Returns `CursorRewind` if `target` is below the cursor
    pub fn skip_to(&mut self, target: u64) -> Result<()> {
        if target < self.cursor {
            return Err(BootError::CursorRewind {
                cursor: self.cursor,
                target,
            });
        }
        self.cursor = target;
        Ok(())
    }
}
