//! EC and VID headers
//!
//! Every PEB starts with an erase-counter header at offset 0 and, once it
//! holds data, a volume-identifier header at the configured VID offset.
//! Both are 64 bytes, big-endian, and carry a UBI CRC over their first 60
//! bytes.

use crate::types::{VolumeType, UBI_HEADER_SIZE};
use crate::utils::bytes::{be32, be64, is_erased};
use crate::utils::checksum::ubi_crc32;

/// Bytes covered by a header CRC
const HEADER_CRC_SPAN: usize = UBI_HEADER_SIZE - 4;

/// Outcome of decoding a header slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState<T> {
    /// Valid header
    Valid(T),
    /// Slot never written
    Erased,
    /// Bad magic, version or CRC
    Corrupt,
}

fn crc_ok(data: &[u8]) -> bool {
    ubi_crc32(&data[..HEADER_CRC_SPAN]) == be32(data, HEADER_CRC_SPAN)
}

/// Erase counter header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcHeader {
    /// Erase count
    pub ec: u64,
    /// VID header offset recorded at format time
    pub vid_hdr_offset: u32,
    /// Data offset recorded at format time
    pub data_offset: u32,
    /// Image sequence number
    pub image_seq: u32,
}

impl EcHeader {
    /// "UBI#"
    pub const MAGIC: u32 = 0x5542_4923;

    /// Supported format version
    pub const VERSION: u8 = 1;

    /// Decode the first 64 bytes of `data`
    pub fn parse(data: &[u8]) -> HeaderState<Self> {
        if data.len() < UBI_HEADER_SIZE {
            return HeaderState::Corrupt;
        }
        let data = &data[..UBI_HEADER_SIZE];
        if is_erased(data) {
            return HeaderState::Erased;
        }
        if be32(data, 0) != Self::MAGIC || data[4] != Self::VERSION || !crc_ok(data) {
            return HeaderState::Corrupt;
        }
        HeaderState::Valid(Self {
            ec: be64(data, 8),
            vid_hdr_offset: be32(data, 16),
            data_offset: be32(data, 20),
            image_seq: be32(data, 24),
        })
    }
}

/// Volume identifier header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VidHeader {
    /// Volume type
    pub vol_type: VolumeType,
    /// Set when the PEB was written by wear-levelling copy
    pub copy_flag: u8,
    /// Compatibility flags of internal volumes
    pub compat: u8,
    /// Volume id
    pub vol_id: u32,
    /// Logical eraseblock number
    pub lnum: u32,
    /// Bytes of data in this LEB (static volumes)
    pub data_size: u32,
    /// LEBs used by the volume (static volumes)
    pub used_ebs: u32,
    /// Unused bytes at the end of each LEB
    pub data_pad: u32,
    /// Data CRC (static volumes)
    pub data_crc: u32,
    /// Global write sequence number
    pub sqnum: u64,
}

impl VidHeader {
    /// "UBI!"
    pub const MAGIC: u32 = 0x5542_4921;

    /// Supported format version
    pub const VERSION: u8 = 1;

    /// `vol_type` code for dynamic volumes
    pub const VOL_DYNAMIC: u8 = 1;

    /// `vol_type` code for static volumes
    pub const VOL_STATIC: u8 = 2;

    /// Decode the first 64 bytes of `data`
    pub fn parse(data: &[u8]) -> HeaderState<Self> {
        if data.len() < UBI_HEADER_SIZE {
            return HeaderState::Corrupt;
        }
        let data = &data[..UBI_HEADER_SIZE];
        if is_erased(data) {
            return HeaderState::Erased;
        }
        if be32(data, 0) != Self::MAGIC || data[4] != Self::VERSION || !crc_ok(data) {
            return HeaderState::Corrupt;
        }
        let vol_type = match data[5] {
            Self::VOL_DYNAMIC => VolumeType::Dynamic,
            Self::VOL_STATIC => VolumeType::Static,
            _ => return HeaderState::Corrupt,
        };
        HeaderState::Valid(Self {
            vol_type,
            copy_flag: data[6],
            compat: data[7],
            vol_id: be32(data, 8),
            lnum: be32(data, 12),
            data_size: be32(data, 20),
            used_ebs: be32(data, 24),
            data_pad: be32(data, 28),
            data_crc: be32(data, 32),
            sqnum: be64(data, 40),
        })
    }
}
