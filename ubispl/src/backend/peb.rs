//! Physical erase block reads
//!
//! UBI addresses flash as `(pnum, offset, len)` inside physical erase
//! blocks. A PEB usually spans many device blocks, and headers sit at
//! offsets that are not block aligned, so reads go straight into the
//! caller's buffer when they line up and through a one-block bounce buffer
//! when they do not.

use super::BootBackend;
use crate::error::{Result, SplError};
use crate::types::FlashGeometry;
use alloc::vec;
use alloc::vec::Vec;
use gpt_disk_types::Lba;

/// Reads byte ranges of PEBs from a backend
pub struct PebReader<B: BootBackend> {
    backend: B,
    geometry: FlashGeometry,
    block_size: u64,
    bounce: Vec<u8>,
}

impl<B: BootBackend> PebReader<B> {
    /// Wrap a backend, validating its geometry
    pub fn new(backend: B) -> Result<Self> {
        let geometry = backend.geometry();
        geometry.validate()?;
        let block_size = backend.block_size();
        if block_size == 0 {
            return Err(SplError::InvalidGeometry("zero block size"));
        }
        Ok(Self {
            backend,
            geometry,
            block_size: block_size as u64,
            bounce: vec![0u8; block_size as usize],
        })
    }

    /// UBI layout being read
    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    /// Number of PEBs in the UBI area
    pub fn peb_count(&self) -> u32 {
        self.geometry.peb_count
    }

    /// Logical erase block size
    pub fn leb_size(&self) -> u32 {
        self.geometry.leb_size()
    }

    /// Read `dst.len()` bytes at `offset` within PEB `pnum`
    pub fn read(&mut self, pnum: u32, offset: u32, dst: &mut [u8]) -> Result<()> {
        if pnum >= self.geometry.peb_count {
            return Err(SplError::PebOutOfRange {
                pnum,
                count: self.geometry.peb_count,
            });
        }
        if offset as u64 + dst.len() as u64 > self.geometry.peb_size as u64 {
            return Err(SplError::InvalidGeometry("read crosses PEB end"));
        }

        let bs = self.block_size;
        let mut pos = (self.geometry.peb_offset as u64 + pnum as u64)
            * self.geometry.peb_size as u64
            + offset as u64;
        let mut done = 0usize;

        while done < dst.len() {
            let remaining = dst.len() - done;
            let in_block = (pos % bs) as usize;
            let lba = Lba(pos / bs);

            if in_block == 0 && remaining as u64 >= bs {
                // Whole blocks land directly in the caller's buffer
                let whole = (remaining as u64 / bs * bs) as usize;
                self.backend.read_blocks(lba, &mut dst[done..done + whole])?;
                done += whole;
                pos += whole as u64;
            } else {
                let n = core::cmp::min(bs as usize - in_block, remaining);
                self.backend.read_blocks(lba, &mut self.bounce)?;
                dst[done..done + n].copy_from_slice(&self.bounce[in_block..in_block + n]);
                done += n;
                pos += n as u64;
            }
        }

        Ok(())
    }

    /// Release the backend
    pub fn into_inner(self) -> B {
        self.backend
    }
}
