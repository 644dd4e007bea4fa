//! Image format detection and loading
//!
//! A loaded volume starts with either a legacy 64-byte header or a FIT
//! container (an FDT blob). [`parse_header`] tells them apart by magic.
//!
//! Images are read through an [`ImageSource`]: the bytes already resident
//! in memory plus a way to make more of them resident. This lets the
//! monitor path read a short probe first and pull in the rest of the image
//! only once its header says how long it is.

pub mod fdt;
pub mod fit;
pub mod legacy;

pub use fdt::FdtHeader;
pub use fit::{load_container, ContainerImage};
pub use legacy::{load_legacy, LegacyHeader};

use crate::backend::BootBackend;
use crate::error::{Result, SplError};
use crate::region::LoadRegion;
use crate::ubi::VolumeReader;
use crate::utils::bytes::get_be32;

/// Decoded image header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageHeader {
    /// Legacy fixed header
    Legacy(LegacyHeader),
    /// FIT container
    Container(FdtHeader),
}

/// Sniff and decode the header at the start of `buf`
///
/// Unknown magic is `UnrecognizedFormat`. Never writes anywhere.
pub fn parse_header(buf: &[u8]) -> Result<ImageHeader> {
    let magic = get_be32(buf, 0).ok_or(SplError::UnrecognizedFormat(0))?;
    match magic {
        LegacyHeader::MAGIC => LegacyHeader::parse(buf).map(ImageHeader::Legacy),
        FdtHeader::MAGIC => FdtHeader::parse(buf).map(ImageHeader::Container),
        other => Err(SplError::UnrecognizedFormat(other)),
    }
}

/// Image bytes, partly or fully resident in memory
pub trait ImageSource {
    /// Bytes resident so far, starting at the first image byte
    fn resident(&self) -> &[u8];

    /// Target address of the first image byte
    fn base(&self) -> u64;

    /// Make the first `len` bytes resident
    fn extend(&mut self, len: u64) -> Result<()>;
}

/// Image already fully in memory
pub struct MemoryImage<'a> {
    base: u64,
    data: &'a [u8],
}

impl<'a> MemoryImage<'a> {
    /// Wrap `data`, located at `base`
    pub fn new(base: u64, data: &'a [u8]) -> Self {
        Self { base, data }
    }
}

impl ImageSource for MemoryImage<'_> {
    fn resident(&self) -> &[u8] {
        self.data
    }

    fn base(&self) -> u64 {
        self.base
    }

    fn extend(&mut self, len: u64) -> Result<()> {
        if len > self.data.len() as u64 {
            return Err(SplError::ContainerSizeExceeded {
                declared: len,
                available: self.data.len() as u64,
            });
        }
        Ok(())
    }
}

/// Image read on demand from a volume into a load region
pub struct VolumeImage<'a, B: BootBackend> {
    volume: VolumeReader<'a, B>,
    region: LoadRegion<'a>,
    loaded: usize,
    extensions: u32,
}

impl<'a, B: BootBackend> VolumeImage<'a, B> {
    /// Read the first `probe_len` bytes of the volume into `region`
    ///
    /// The read is cut short by the volume size and by the region. Only a
    /// region too small for a header fails here; the declared image size
    /// is checked when the image is extended.
    pub fn probe(
        mut volume: VolumeReader<'a, B>,
        mut region: LoadRegion<'a>,
        probe_len: u64,
    ) -> Result<Self> {
        let size = volume.size();
        let header = core::cmp::min(size, LegacyHeader::SIZE as u64);
        if region.capacity() < header {
            return Err(SplError::DestinationOverflow {
                addr: region.base,
                size: header,
            });
        }
        let len = probe_len.min(size).min(region.capacity());
        volume.read_at(0, &mut region.buf[..len as usize])?;
        Ok(Self {
            volume,
            region,
            loaded: len as usize,
            extensions: 0,
        })
    }

    /// Extending reads performed after the probe
    pub fn extensions(&self) -> u32 {
        self.extensions
    }

    /// Logical size of the backing volume
    pub fn volume_size(&self) -> u64 {
        self.volume.size()
    }
}

impl<B: BootBackend> ImageSource for VolumeImage<'_, B> {
    fn resident(&self) -> &[u8] {
        &self.region.buf[..self.loaded]
    }

    fn base(&self) -> u64 {
        self.region.base
    }

    fn extend(&mut self, len: u64) -> Result<()> {
        if len <= self.loaded as u64 {
            return Ok(());
        }
        let available = self.volume.size();
        if len > available {
            return Err(SplError::ContainerSizeExceeded {
                declared: len,
                available,
            });
        }
        if len > self.region.capacity() {
            return Err(SplError::DestinationOverflow {
                addr: self.region.base,
                size: len,
            });
        }

        let end = len as usize;
        self.volume
            .read_at(self.loaded as u64, &mut self.region.buf[self.loaded..end])?;
        self.loaded = end;
        self.extensions += 1;
        Ok(())
    }
}
