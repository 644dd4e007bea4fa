//! Caller-owned load regions
//!
//! The loader never writes to fixed addresses. Callers hand in windows of
//! target memory, each a base address plus the buffer backing it, and every
//! placement is checked against them before a byte is copied.

use crate::error::{Result, SplError};

/// A window of target memory
#[derive(Debug)]
pub struct LoadRegion<'a> {
    /// Address of `buf[0]`
    pub base: u64,
    /// Memory backing the window
    pub buf: &'a mut [u8],
}

impl<'a> LoadRegion<'a> {
    /// Window at `base` backed by `buf`
    pub fn new(base: u64, buf: &'a mut [u8]) -> Self {
        Self { base, buf }
    }

    /// Size in bytes
    pub fn capacity(&self) -> u64 {
        self.buf.len() as u64
    }

    /// True if `[addr, addr + size)` lies inside the window
    pub fn contains(&self, addr: u64, size: u64) -> bool {
        addr >= self.base
            && (addr - self.base)
                .checked_add(size)
                .map_or(false, |end| end <= self.capacity())
    }

    /// Mutable view of `[addr, addr + size)`, `None` if outside
    pub fn slice_mut(&mut self, addr: u64, size: u64) -> Option<&mut [u8]> {
        if !self.contains(addr, size) {
            return None;
        }
        let start = (addr - self.base) as usize;
        Some(&mut self.buf[start..start + size as usize])
    }

    /// Reborrow for a shorter lifetime
    pub fn reborrow(&mut self) -> LoadRegion<'_> {
        LoadRegion {
            base: self.base,
            buf: &mut *self.buf,
        }
    }
}

/// Index of the region holding `[addr, addr + size)`
pub fn find_region(regions: &[LoadRegion<'_>], addr: u64, size: u64) -> Result<usize> {
    regions
        .iter()
        .position(|r| r.contains(addr, size))
        .ok_or(SplError::DestinationOverflow { addr, size })
}
