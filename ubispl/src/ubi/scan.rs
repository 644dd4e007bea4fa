//! Full scan
//!
//! Reads the EC and VID headers of every PEB in the UBI area and keeps the
//! newest copy of each logical erase block.

use super::headers::{EcHeader, HeaderState, VidHeader};
use super::{normalize_map, LebCandidates, VolumeMap};
use crate::backend::{BootBackend, PebReader};
use crate::error::Result;
use crate::types::UBI_HEADER_SIZE;
use alloc::vec;
use log::debug;
#[cfg(feature = "trace")]
use log::trace;

/// Read the headers of PEB `pnum`
///
/// `buf` must hold at least `vid_offset + 64` bytes. Returns `None` for free
/// PEBs and PEBs whose headers do not validate.
pub(crate) fn read_vid<B: BootBackend>(
    reader: &mut PebReader<B>,
    pnum: u32,
    buf: &mut [u8],
) -> Result<Option<VidHeader>> {
    let vid_offset = reader.geometry().vid_offset;
    let buf = &mut buf[..vid_offset as usize + UBI_HEADER_SIZE];
    reader.read(pnum, 0, buf)?;

    match EcHeader::parse(buf) {
        HeaderState::Valid(ec) if ec.vid_hdr_offset != vid_offset => {
            debug!(
                "PEB {}: VID offset {} does not match {}",
                pnum, ec.vid_hdr_offset, vid_offset
            );
            return Ok(None);
        }
        HeaderState::Valid(_) => {}
        HeaderState::Erased => return Ok(None),
        HeaderState::Corrupt => {
            debug!("PEB {}: bad EC header", pnum);
            return Ok(None);
        }
    }

    match VidHeader::parse(&buf[vid_offset as usize..]) {
        HeaderState::Valid(vid) => {
            #[cfg(feature = "trace")]
            trace!(
                "PEB {}: vol {} lnum {} sqnum {}",
                pnum,
                vid.vol_id,
                vid.lnum,
                vid.sqnum
            );
            Ok(Some(vid))
        }
        HeaderState::Erased => Ok(None),
        HeaderState::Corrupt => {
            debug!("PEB {}: bad VID header", pnum);
            Ok(None)
        }
    }
}

/// Build the volume map by reading every PEB
///
/// Corrupt headers are skipped; a device read error aborts the scan.
pub fn full_scan<B: BootBackend>(reader: &mut PebReader<B>) -> Result<VolumeMap> {
    let geometry = *reader.geometry();
    let mut buf = vec![0u8; geometry.vid_offset as usize + UBI_HEADER_SIZE];
    let mut candidates = LebCandidates::default();

    for pnum in 0..geometry.peb_count {
        let Some(vid) = read_vid(reader, pnum, &mut buf)? else {
            continue;
        };
        // A volume never has more LEBs than the device has PEBs
        if vid.lnum >= geometry.peb_count {
            debug!("PEB {}: LEB {} out of range", pnum, vid.lnum);
            continue;
        }
        candidates.offer(pnum, vid);
    }

    let mut map = VolumeMap::new();
    candidates.apply(&mut map);
    normalize_map(&mut map, geometry.leb_size());
    debug!("UBI: scanned {} PEBs, {} volumes", geometry.peb_count, map.len());
    Ok(map)
}
