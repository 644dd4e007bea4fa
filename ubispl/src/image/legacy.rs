//! Legacy fixed-header images (uImage)

use super::ImageSource;
use crate::error::{ChecksumKind, Result, SplError};
use crate::types::{ImageInfo, ImageKind, ImageOs};
use crate::utils::bytes::be32;
use crate::utils::checksum::{crc32, crc32_zeroed};

/// Legacy image header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyHeader {
    /// Header CRC
    pub hcrc: u32,
    /// Creation timestamp
    pub time: u32,
    /// Payload size
    pub size: u32,
    /// Load address
    pub load: u32,
    /// Entry point
    pub ep: u32,
    /// Payload CRC
    pub dcrc: u32,
    /// OS code
    pub os: u8,
    /// CPU architecture code
    pub arch: u8,
    /// Image type code
    pub image_type: u8,
    /// Compression code
    pub comp: u8,
    /// Image name, NUL padded
    pub name: [u8; 32],
}

impl LegacyHeader {
    /// Header magic
    pub const MAGIC: u32 = 0x2705_1956;

    /// Header size
    pub const SIZE: usize = 64;

    /// Decode and check the header at the start of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(SplError::ContainerSizeExceeded {
                declared: Self::SIZE as u64,
                available: buf.len() as u64,
            });
        }
        let raw = &buf[..Self::SIZE];
        let magic = be32(raw, 0);
        if magic != Self::MAGIC {
            return Err(SplError::UnrecognizedFormat(magic));
        }

        let hcrc = be32(raw, 4);
        if crc32_zeroed(raw, 4, 4) != hcrc {
            return Err(SplError::ChecksumMismatch(ChecksumKind::ImageHeader));
        }

        let mut name = [0u8; 32];
        name.copy_from_slice(&raw[32..64]);
        Ok(Self {
            hcrc,
            time: be32(raw, 8),
            size: be32(raw, 12),
            load: be32(raw, 16),
            ep: be32(raw, 20),
            dcrc: be32(raw, 24),
            os: raw[28],
            arch: raw[29],
            image_type: raw[30],
            comp: raw[31],
            name,
        })
    }

    /// Image name up to the first NUL
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }

    /// Target OS
    pub fn image_os(&self) -> ImageOs {
        ImageOs::from_ih_os(self.os)
    }

    /// Header plus payload
    pub fn total_size(&self) -> u64 {
        Self::SIZE as u64 + self.size as u64
    }
}

/// Bring the whole image resident and check its payload
///
/// The payload stays where it was read; the descriptor records both its
/// current address and the address it is linked for.
pub fn load_legacy<S: ImageSource + ?Sized>(src: &mut S, header: &LegacyHeader) -> Result<ImageInfo> {
    src.extend(header.total_size())?;

    let payload = &src.resident()[LegacyHeader::SIZE..header.total_size() as usize];
    if crc32(payload) != header.dcrc {
        return Err(SplError::ChecksumMismatch(ChecksumKind::ImageData));
    }

    Ok(ImageInfo {
        kind: ImageKind::Legacy,
        os: header.image_os(),
        load_addr: header.load as u64,
        entry_point: header.ep as u64,
        size: header.size as u64,
        data_addr: src.base() + LegacyHeader::SIZE as u64,
    })
}
