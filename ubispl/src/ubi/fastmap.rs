//! Fast index (fastmap)
//!
//! The OS may leave a fastmap behind: a snapshot of every volume's EBA
//! table, located through an anchor PEB near the start of the device.
//! Using it avoids reading every PEB's headers. PEBs that were handed out
//! after the snapshot sit in two pools and are rescanned.
//!
//! Anything that does not validate makes the fastmap unusable; the caller
//! then falls back to the full scan.

use super::headers::VidHeader;
use super::scan::read_vid;
use super::{normalize_map, LebCandidates, VolumeLayout, VolumeMap};
use crate::backend::{BootBackend, PebReader};
use crate::types::{
    VolumeType, UBI_FM_DATA_VOLUME_ID, UBI_FM_MAX_START, UBI_FM_SB_VOLUME_ID, UBI_HEADER_SIZE,
};
use crate::utils::bytes::{be16, be32, be64};
use crate::utils::checksum::{crc32_update_zeroed, UBI_CRC32_INIT};
use alloc::vec;
use alloc::vec::Vec;
use log::debug;

/// Superblock magic
pub const FM_SB_MAGIC: u32 = 0x7B11_D69F;
/// Header magic
pub const FM_HDR_MAGIC: u32 = 0xD4B8_2EF7;
/// Pool magic
pub const FM_POOL_MAGIC: u32 = 0x67AF_4D08;
/// Volume header magic
pub const FM_VHDR_MAGIC: u32 = 0xFA37_0ED1;
/// EBA block magic
pub const FM_EBA_MAGIC: u32 = 0xF0C0_40A8;
/// Supported fastmap version
pub const FM_VERSION: u8 = 2;

/// Maximum PEBs a fastmap spans
pub const FM_MAX_BLOCKS: usize = 32;
/// Maximum PEBs per pool
pub const FM_MAX_POOL_SIZE: usize = 256;

/// Superblock size
pub const FM_SB_SIZE: usize = 312;
/// Header size
pub const FM_HDR_SIZE: usize = 32;
/// Pool size
pub const FM_POOL_SIZE: usize = 8 + FM_MAX_POOL_SIZE * 4 + 16;
/// Volume header size
pub const FM_VHDR_SIZE: usize = 32;

/// Offset of `data_crc` in the superblock
const SB_DATA_CRC: usize = 8;
/// Offset of `sqnum` in the superblock
const SB_SQNUM: usize = 272;

/// Why a fastmap was rejected
type Reject<T> = core::result::Result<T, &'static str>;

/// Bounds-checked reader over the fastmap bytes
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Reject<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or("length overflow")?;
        let slice = self.data.get(self.pos..end).ok_or("truncated")?;
        self.pos = end;
        Ok(slice)
    }

    fn expect_magic(&mut self, magic: u32, what: &'static str) -> Reject<()> {
        if be32(self.take(4)?, 0) == magic {
            Ok(())
        } else {
            Err(what)
        }
    }
}

/// Attach through the fastmap, `None` if there is no usable one
pub fn try_fast_index<B: BootBackend>(reader: &mut PebReader<B>) -> Option<VolumeMap> {
    match read_fastmap(reader) {
        Ok(map) => {
            debug!("UBI: fastmap attached, {} volumes", map.len());
            Some(map)
        }
        Err(reason) => {
            debug!("UBI: fastmap unusable ({}), scanning", reason);
            None
        }
    }
}

fn read_fastmap<B: BootBackend>(reader: &mut PebReader<B>) -> Reject<VolumeMap> {
    let geometry = *reader.geometry();
    let leb_size = geometry.leb_size() as usize;
    let mut hdrs = vec![0u8; geometry.vid_offset as usize + UBI_HEADER_SIZE];

    // Newest anchor among the first PEBs
    let mut anchor: Option<(u32, u64)> = None;
    for pnum in 0..core::cmp::min(UBI_FM_MAX_START, geometry.peb_count) {
        let vid = read_vid(reader, pnum, &mut hdrs).map_err(|_| "anchor search read failed")?;
        if let Some(vid) = vid {
            if vid.vol_id == UBI_FM_SB_VOLUME_ID && anchor.map_or(true, |(_, sq)| vid.sqnum > sq) {
                anchor = Some((pnum, vid.sqnum));
            }
        }
    }
    let (anchor_pnum, _) = anchor.ok_or("no anchor")?;

    let mut raw = vec![0u8; leb_size];
    reader
        .read(anchor_pnum, geometry.leb_start, &mut raw)
        .map_err(|_| "anchor read failed")?;

    if raw.len() < FM_SB_SIZE || be32(&raw, 0) != FM_SB_MAGIC {
        return Err("bad superblock magic");
    }
    if raw[4] != FM_VERSION {
        return Err("unsupported version");
    }
    let used_blocks = be32(&raw, 12) as usize;
    if used_blocks == 0 || used_blocks > FM_MAX_BLOCKS {
        return Err("bad block count");
    }
    let block_loc: Vec<u32> = (0..used_blocks).map(|i| be32(&raw, 16 + i * 4)).collect();
    if block_loc[0] != anchor_pnum {
        return Err("anchor not listed first");
    }

    // Remaining fastmap blocks follow the anchor's LEB
    raw.resize(used_blocks * leb_size, 0);
    for (i, &pnum) in block_loc.iter().enumerate().skip(1) {
        let vid = read_vid(reader, pnum, &mut hdrs)
            .map_err(|_| "data block read failed")?
            .ok_or("data block has no VID header")?;
        if vid.vol_id != UBI_FM_DATA_VOLUME_ID || vid.lnum != i as u32 {
            return Err("data block VID mismatch");
        }
        reader
            .read(pnum, geometry.leb_start, &mut raw[i * leb_size..(i + 1) * leb_size])
            .map_err(|_| "data block read failed")?;
    }

    let stored_crc = be32(&raw, SB_DATA_CRC);
    if crc32_update_zeroed(UBI_CRC32_INIT, &raw, SB_DATA_CRC, 4) != stored_crc {
        return Err("data CRC mismatch");
    }
    let fm_sqnum = be64(&raw, SB_SQNUM);

    let mut cur = Cursor {
        data: &raw,
        pos: FM_SB_SIZE,
    };

    let hdr = cur.take(FM_HDR_SIZE)?;
    if be32(hdr, 0) != FM_HDR_MAGIC {
        return Err("bad header magic");
    }
    let ec_entries = [4usize, 8, 12, 20]
        .iter()
        .map(|&off| be32(hdr, off) as u64)
        .sum::<u64>();
    let vol_count = be32(hdr, 24);
    if ec_entries > geometry.peb_count as u64 {
        return Err("more EC entries than PEBs");
    }

    let mut pool = Vec::new();
    for _ in 0..2 {
        let raw_pool = cur.take(FM_POOL_SIZE)?;
        if be32(raw_pool, 0) != FM_POOL_MAGIC {
            return Err("bad pool magic");
        }
        let size = be16(raw_pool, 4) as usize;
        if size > FM_MAX_POOL_SIZE {
            return Err("pool too large");
        }
        pool.extend((0..size).map(|i| be32(raw_pool, 8 + i * 4)));
    }

    // Erase counters are of no use for reading
    cur.take(ec_entries as usize * 8)?;

    let mut map = VolumeMap::new();
    for _ in 0..vol_count {
        let vhdr = cur.take(FM_VHDR_SIZE)?;
        if be32(vhdr, 0) != FM_VHDR_MAGIC {
            return Err("bad volume header magic");
        }
        let vol_id = be32(vhdr, 4);
        let vol_type = match vhdr[8] {
            VidHeader::VOL_DYNAMIC => VolumeType::Dynamic,
            VidHeader::VOL_STATIC => VolumeType::Static,
            _ => return Err("bad volume type"),
        };

        cur.expect_magic(FM_EBA_MAGIC, "bad EBA magic")?;
        let reserved_pebs = be32(cur.take(4)?, 0);
        if reserved_pebs > geometry.peb_count {
            return Err("EBA larger than device");
        }
        let pnums = cur.take(reserved_pebs as usize * 4)?;
        let mut eba = Vec::with_capacity(reserved_pebs as usize);
        for i in 0..reserved_pebs as usize {
            let pnum = be32(pnums, i * 4) as i32;
            if pnum < 0 {
                eba.push(None);
            } else if (pnum as u32) < geometry.peb_count {
                eba.push(Some(pnum as u32));
            } else {
                return Err("EBA entry out of range");
            }
        }

        if map.contains_key(&vol_id) {
            return Err("duplicate volume");
        }
        map.insert(
            vol_id,
            VolumeLayout {
                vol_type,
                data_pad: be32(vhdr, 12),
                used_ebs: be32(vhdr, 16),
                last_eb_bytes: be32(vhdr, 20),
                eba,
            },
        );
    }

    // PEBs written after the snapshot override it
    let mut newer = LebCandidates::default();
    for &pnum in &pool {
        if pnum >= geometry.peb_count {
            return Err("pool PEB out of range");
        }
        let vid = read_vid(reader, pnum, &mut hdrs).map_err(|_| "pool read failed")?;
        match vid {
            Some(vid) if vid.sqnum > fm_sqnum && vid.lnum < geometry.peb_count => {
                newer.offer(pnum, vid)
            }
            _ => {}
        }
    }
    newer.apply(&mut map);

    normalize_map(&mut map, geometry.leb_size());
    Ok(map)
}
