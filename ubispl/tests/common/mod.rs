//! Common test utilities and mock block devices

#![allow(dead_code)]

pub mod builder;
pub use builder::{legacy_image, FitBuilder, FitImage, UbiBuilder, UbiImage};

use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};
use std::cell::Cell;
use std::io;
use std::ops::Range;
use std::rc::Rc;
use ubispl::{BlockIoBackend, BootDeviceKind, FlashGeometry};

/// Device block size used by every test image
pub const BLOCK_SIZE: usize = 2048;

/// Shared counters observed after a backend has been handed over
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub reads: Rc<Cell<usize>>,
    pub selects: Rc<Cell<usize>>,
    pub deselects: Rc<Cell<usize>>,
}

impl Counters {
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    pub fn selects(&self) -> usize {
        self.selects.get()
    }

    pub fn deselects(&self) -> usize {
        self.deselects.get()
    }
}

/// In-memory flash device for testing
#[derive(Debug, Clone)]
pub struct MemoryBlockDevice {
    pub data: Vec<u8>,
    pub block_size: usize,
    pub counters: Counters,
    /// Reads touching these LBAs fail
    pub fail_lbas: Option<Range<u64>>,
}

impl MemoryBlockDevice {
    /// Create a new memory block device from raw data
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            block_size: BLOCK_SIZE,
            counters: Counters::default(),
            fail_lbas: None,
        }
    }

    /// Make every read of `pnum` fail
    pub fn fail_peb(mut self, geometry: &FlashGeometry, pnum: u32) -> Self {
        let blocks = geometry.peb_size as u64 / self.block_size as u64;
        let first = (geometry.peb_offset + pnum) as u64 * blocks;
        self.fail_lbas = Some(first..first + blocks);
        self
    }

    /// Make reads of the LEB data of `pnum` fail, headers stay readable
    pub fn fail_leb_data(mut self, geometry: &FlashGeometry, pnum: u32) -> Self {
        let bs = self.block_size as u64;
        let peb_start = (geometry.peb_offset + pnum) as u64 * geometry.peb_size as u64;
        let first = (peb_start + geometry.leb_start as u64) / bs;
        let end = (peb_start + geometry.peb_size as u64) / bs;
        self.fail_lbas = Some(first..end);
        self
    }
}

impl BlockIo for MemoryBlockDevice {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(self.block_size as u32).expect("valid block size")
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok((self.data.len() / self.block_size) as u64)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        self.counters.reads.set(self.counters.reads.get() + 1);

        let count = (dst.len() / self.block_size) as u64;
        if let Some(fail) = &self.fail_lbas {
            if start_lba.0 < fail.end && fail.start < start_lba.0 + count {
                return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
            }
        }

        let offset = start_lba.0 as usize * self.block_size;
        if offset + dst.len() > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read beyond end of device",
            ));
        }
        dst.copy_from_slice(&self.data[offset..offset + dst.len()]);
        Ok(())
    }

    fn write_blocks(&mut self, start_lba: Lba, src: &[u8]) -> Result<(), Self::Error> {
        let offset = start_lba.0 as usize * self.block_size;
        if offset + src.len() > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write beyond end of device",
            ));
        }
        self.data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn count_select(io: &mut MemoryBlockDevice) {
    io.counters.selects.set(io.counters.selects.get() + 1);
}

fn count_deselect(io: &mut MemoryBlockDevice) {
    io.counters.deselects.set(io.counters.deselects.get() + 1);
}

/// Backend over a memory device with counting lifecycle hooks
pub type MockBackend = BlockIoBackend<MemoryBlockDevice>;

/// Wrap a device as a backend of `kind`
pub fn mock_backend(
    kind: BootDeviceKind,
    device: MemoryBlockDevice,
    geometry: FlashGeometry,
) -> (MockBackend, Counters) {
    let counters = device.counters.clone();
    let backend =
        BlockIoBackend::new(kind, device, geometry).with_hooks(count_select, count_deselect);
    (backend, counters)
}

/// Load regions backed by owned buffers
pub struct Memory {
    pub image: Vec<u8>,
    pub args: Vec<u8>,
    pub dram: Vec<u8>,
}

pub const IMAGE_BASE: u64 = 0x8200_0000;
pub const ARGS_BASE: u64 = 0x8800_0000;
pub const DRAM_BASE: u64 = 0x8700_0000;

impl Memory {
    /// Buffers pre-filled with `fill` so untouched bytes are visible
    pub fn new(image: usize, args: usize, dram: usize, fill: u8) -> Self {
        Self {
            image: vec![fill; image],
            args: vec![fill; args],
            dram: vec![fill; dram],
        }
    }

    pub fn targets(&mut self) -> ubispl::LoadTargets<'_> {
        ubispl::LoadTargets {
            image: ubispl::LoadRegion::new(IMAGE_BASE, &mut self.image),
            args: ubispl::LoadRegion::new(ARGS_BASE, &mut self.args),
            sub_images: vec![ubispl::LoadRegion::new(DRAM_BASE, &mut self.dram)],
        }
    }
}
