//! Volume read handle

use super::VolumeEntry;
use crate::backend::{BootBackend, PebReader};
use crate::error::{Result, SplError};

/// Byte-addressed reader over one volume's logical contents
///
/// LEBs that are not mapped read as erased flash (0xFF). Reads never pass
/// the volume's logical size.
pub struct VolumeReader<'a, B: BootBackend> {
    entry: &'a VolumeEntry,
    reader: &'a mut PebReader<B>,
    position: u64,
}

impl<'a, B: BootBackend> VolumeReader<'a, B> {
    /// Open `entry` for reading through `reader`
    pub fn new(entry: &'a VolumeEntry, reader: &'a mut PebReader<B>) -> Self {
        Self {
            entry,
            reader,
            position: 0,
        }
    }

    /// Directory entry being read
    pub fn entry(&self) -> &VolumeEntry {
        self.entry
    }

    /// Logical volume size
    pub fn size(&self) -> u64 {
        self.entry.size()
    }

    /// Current position for sequential reads
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left after the current position
    pub fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.position)
    }

    /// Move the position
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.size() {
            return Err(SplError::VolumeOverrun {
                offset: position,
                len: 0,
                size: self.size(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Fill `buf` from `offset`
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let size = self.size();
        let len = buf.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > size) {
            return Err(SplError::VolumeOverrun { offset, len, size });
        }

        let usable = self.entry.usable_leb_size as u64;
        let leb_start = self.reader.geometry().leb_start;
        let mut done = 0usize;

        while done < buf.len() {
            let pos = offset + done as u64;
            let lnum = (pos / usable) as u32;
            let in_leb = (pos % usable) as u32;
            let n = core::cmp::min(usable as usize - in_leb as usize, buf.len() - done);
            let chunk = &mut buf[done..done + n];

            match self.entry.pnum(lnum) {
                Some(pnum) => self.reader.read(pnum, leb_start + in_leb, chunk)?,
                None => chunk.fill(0xFF),
            }
            done += n;
        }

        Ok(())
    }

    /// Fill `buf` from the current position and advance
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_at(self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Read the rest of the volume into the front of `buf`
    ///
    /// Returns the byte count. Fails with `DestinationOverflow` before any
    /// read if `buf` is too small.
    pub fn read_to_end(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.remaining();
        if remaining > buf.len() as u64 {
            return Err(SplError::DestinationOverflow {
                addr: 0,
                size: remaining,
            });
        }
        let n = remaining as usize;
        self.read(&mut buf[..n])?;
        Ok(n)
    }
}
