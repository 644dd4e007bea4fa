//! Volume table
//!
//! The layout volume keeps two identical copies of the volume table in its
//! LEBs 0 and 1. Each record is 172 bytes; the record index is the volume
//! id and a record with no reserved PEBs is an empty slot.

use crate::types::{VolumeName, VolumeType, UBI_MAX_VOLUMES, UBI_VOL_NAME_MAX};
use crate::utils::bytes::{be16, be32};
use crate::utils::checksum::ubi_crc32;
use alloc::vec::Vec;

/// Size of one volume table record
pub const VTBL_RECORD_SIZE: usize = 172;

/// Bytes covered by a record CRC
const VTBL_RECORD_CRC_SPAN: usize = VTBL_RECORD_SIZE - 4;

/// One non-empty volume table record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtblRecord {
    /// Volume id (record index)
    pub vol_id: u32,
    /// PEBs reserved for the volume
    pub reserved_pebs: u32,
    /// LEB alignment
    pub alignment: u32,
    /// Unused bytes at the end of each LEB
    pub data_pad: u32,
    /// Volume type
    pub vol_type: VolumeType,
    /// Interrupted update marker
    pub upd_marker: u8,
    /// Volume name
    pub name: VolumeName,
    /// Volume flags
    pub flags: u8,
}

impl VtblRecord {
    /// `vol_type` code for dynamic volumes
    pub const DYNAMIC: u8 = 3;

    /// `vol_type` code for static volumes
    pub const STATIC: u8 = 4;
}

/// Number of records a LEB of `leb_size` bytes holds
pub fn record_count(leb_size: u32) -> usize {
    core::cmp::min(UBI_MAX_VOLUMES, leb_size as usize / VTBL_RECORD_SIZE)
}

/// Decode one table copy
///
/// Returns `None` if any record fails its CRC or is inconsistent, so the
/// caller can fall back to the other copy.
pub fn parse_table(data: &[u8]) -> Option<Vec<VtblRecord>> {
    let count = core::cmp::min(UBI_MAX_VOLUMES, data.len() / VTBL_RECORD_SIZE);
    let mut records = Vec::new();

    for (index, raw) in data.chunks_exact(VTBL_RECORD_SIZE).take(count).enumerate() {
        if ubi_crc32(&raw[..VTBL_RECORD_CRC_SPAN]) != be32(raw, VTBL_RECORD_CRC_SPAN) {
            return None;
        }

        let reserved_pebs = be32(raw, 0);
        if reserved_pebs == 0 {
            continue;
        }

        let name_len = be16(raw, 14) as usize;
        if name_len > UBI_VOL_NAME_MAX {
            return None;
        }
        let vol_type = match raw[12] {
            VtblRecord::DYNAMIC => VolumeType::Dynamic,
            VtblRecord::STATIC => VolumeType::Static,
            _ => return None,
        };

        records.push(VtblRecord {
            vol_id: index as u32,
            reserved_pebs,
            alignment: be32(raw, 4),
            data_pad: be32(raw, 8),
            vol_type,
            upd_marker: raw[13],
            name: VolumeName::from_bytes(&raw[16..16 + name_len])?,
            flags: raw[144],
        });
    }

    Some(records)
}
