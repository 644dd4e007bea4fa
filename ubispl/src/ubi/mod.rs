//! UBI volume store
//!
//! Attaching builds an in-memory directory of the UBI volumes on a backend:
//! for every volume, the PEB holding each of its logical erase blocks. Two
//! routes lead there:
//!
//! 1. **Fast index** - the fastmap written by the OS, validated by CRC, plus
//!    a rescan of the few PEBs in its pools
//! 2. **Full scan** - every PEB's EC and VID headers
//!
//! Both produce a [`VolumeMap`]; the directory is then completed from the
//! volume table stored in the layout volume. A fastmap that fails
//! validation is dropped silently in favour of the full scan, so the two
//! routes must agree on every volume.

pub mod fastmap;
pub mod headers;
pub mod scan;
pub mod volume;
pub mod vtbl;

pub use fastmap::try_fast_index;
pub use scan::full_scan;
pub use volume::VolumeReader;

use crate::backend::{BootBackend, PebReader};
use crate::error::{Result, SplError};
use crate::types::{
    VolumeName, VolumeSelector, VolumeType, UBI_INTERNAL_VOL_START, UBI_LAYOUT_VOLUME_ID,
};
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use headers::VidHeader;
use log::{debug, warn};

/// Erase block mapping of one volume as found on flash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLayout {
    /// Volume type from the VID headers or fastmap
    pub vol_type: VolumeType,
    /// Unused bytes at the end of each LEB
    pub data_pad: u32,
    /// LEBs in use
    pub used_ebs: u32,
    /// Data bytes in the last used LEB
    pub last_eb_bytes: u32,
    /// LEB number to PEB number
    pub eba: Vec<Option<u32>>,
}

/// Volume id to layout, internal volumes included
pub type VolumeMap = BTreeMap<u32, VolumeLayout>;

impl VolumeLayout {
    fn from_vid(vid: &VidHeader) -> Self {
        Self {
            vol_type: vid.vol_type,
            data_pad: vid.data_pad,
            used_ebs: 0,
            last_eb_bytes: 0,
            eba: Vec::new(),
        }
    }

    fn map_leb(&mut self, pnum: u32, vid: &VidHeader) {
        let lnum = vid.lnum as usize;
        if self.eba.len() <= lnum {
            self.eba.resize(lnum + 1, None);
        }
        self.eba[lnum] = Some(pnum);

        if vid.vol_type == VolumeType::Static {
            self.used_ebs = vid.used_ebs;
            if vid.lnum + 1 == vid.used_ebs {
                self.last_eb_bytes = vid.data_size;
            }
        }
    }

    /// Bring both attach routes to the same representation
    fn normalize(&mut self, leb_size: u32) {
        let usable = leb_size.saturating_sub(self.data_pad);
        if self.vol_type == VolumeType::Static {
            self.eba.truncate(self.used_ebs as usize);
        }
        while self.eba.last() == Some(&None) {
            self.eba.pop();
        }
        match self.vol_type {
            VolumeType::Dynamic => {
                self.used_ebs = self.eba.len() as u32;
                self.last_eb_bytes = if self.used_ebs == 0 { 0 } else { usable };
            }
            VolumeType::Static => {
                self.last_eb_bytes = self.last_eb_bytes.min(usable);
            }
        }
    }
}

/// Newest copy of each LEB seen while reading VID headers
#[derive(Default)]
pub(crate) struct LebCandidates {
    lebs: BTreeMap<(u32, u32), (u32, VidHeader)>,
}

impl LebCandidates {
    /// Keep `vid` at `pnum` if it is the newest copy of its LEB
    pub(crate) fn offer(&mut self, pnum: u32, vid: VidHeader) {
        let key = (vid.vol_id, vid.lnum);
        match self.lebs.get(&key) {
            Some((_, held)) if held.sqnum >= vid.sqnum => {}
            _ => {
                self.lebs.insert(key, (pnum, vid));
            }
        }
    }

    /// Record every candidate in `map`
    pub(crate) fn apply(self, map: &mut VolumeMap) {
        for ((vol_id, _), (pnum, vid)) in self.lebs {
            map.entry(vol_id)
                .or_insert_with(|| VolumeLayout::from_vid(&vid))
                .map_leb(pnum, &vid);
        }
    }
}

/// Normalize every layout in `map`
pub(crate) fn normalize_map(map: &mut VolumeMap, leb_size: u32) {
    for layout in map.values_mut() {
        layout.normalize(leb_size);
    }
}

/// How a directory was built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachSource {
    /// From a validated fastmap
    FastIndex,
    /// From reading every PEB
    FullScan,
}

/// One user volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeEntry {
    /// Volume id
    pub vol_id: u32,
    /// Name from the volume table
    pub name: Option<VolumeName>,
    /// Volume type
    pub vol_type: VolumeType,
    /// Data bytes per LEB
    pub usable_leb_size: u32,
    /// LEBs in use
    pub used_ebs: u32,
    /// Data bytes in the last used LEB
    pub last_eb_bytes: u32,
    /// LEB number to PEB number
    pub eba: Vec<Option<u32>>,
}

impl VolumeEntry {
    /// Logical size in bytes
    pub fn size(&self) -> u64 {
        if self.used_ebs == 0 {
            return 0;
        }
        (self.used_ebs as u64 - 1) * self.usable_leb_size as u64 + self.last_eb_bytes as u64
    }

    /// PEB holding LEB `lnum`, `None` if unmapped
    pub fn pnum(&self, lnum: u32) -> Option<u32> {
        self.eba.get(lnum as usize).copied().flatten()
    }

    fn matches(&self, selector: &VolumeSelector) -> bool {
        match selector {
            VolumeSelector::Id(id) => self.vol_id == *id,
            VolumeSelector::Name(name) => {
                self.name.as_ref().map(|n| n.as_bytes()) == Some(name.as_bytes())
            }
        }
    }
}

/// Attached volume directory
#[derive(Debug, Clone)]
pub struct VolumeDirectory {
    source: AttachSource,
    volumes: BTreeMap<u32, VolumeEntry>,
}

impl VolumeDirectory {
    /// Route that produced this directory
    pub fn source(&self) -> AttachSource {
        self.source
    }

    /// Volumes ordered by id
    pub fn entries(&self) -> impl Iterator<Item = &VolumeEntry> {
        self.volumes.values()
    }

    /// Number of volumes
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// True if no user volume exists
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Find a volume by id or exact name
    pub fn lookup(&self, selector: &VolumeSelector) -> Result<&VolumeEntry> {
        let found = match selector {
            VolumeSelector::Id(id) => self.volumes.get(id),
            // Linear scan, names are not indexed
            VolumeSelector::Name(_) => self.volumes.values().find(|v| v.matches(selector)),
        };
        found.ok_or(SplError::VolumeNotFound(*selector))
    }

    /// Open a read handle on a volume
    pub fn open<'a, B: BootBackend>(
        &'a self,
        selector: &VolumeSelector,
        reader: &'a mut PebReader<B>,
    ) -> Result<VolumeReader<'a, B>> {
        let entry = self.lookup(selector)?;
        Ok(VolumeReader::new(entry, reader))
    }

    /// Complete a volume map with names from the volume table
    pub fn build<B: BootBackend>(
        reader: &mut PebReader<B>,
        mut map: VolumeMap,
        source: AttachSource,
    ) -> Result<Self> {
        let leb_size = reader.leb_size();
        let records = match map.get(&UBI_LAYOUT_VOLUME_ID) {
            Some(layout) => read_volume_table(reader, layout)?,
            None => {
                warn!("UBI: no layout volume");
                Vec::new()
            }
        };

        let mut volumes = BTreeMap::new();
        for record in records {
            let layout = map.remove(&record.vol_id);
            let mut layout = layout.unwrap_or(VolumeLayout {
                vol_type: record.vol_type,
                data_pad: record.data_pad,
                used_ebs: 0,
                last_eb_bytes: 0,
                eba: Vec::new(),
            });
            layout.vol_type = record.vol_type;
            layout.data_pad = record.data_pad;
            layout.normalize(leb_size);
            if let Some(entry) = make_entry(record.vol_id, Some(record.name), layout, leb_size) {
                volumes.insert(record.vol_id, entry);
            }
        }

        // Volumes on flash that the table does not name
        for (vol_id, layout) in map {
            if vol_id >= UBI_INTERNAL_VOL_START {
                continue;
            }
            if let Some(entry) = make_entry(vol_id, None, layout, leb_size) {
                volumes.insert(vol_id, entry);
            }
        }

        debug!("UBI: {} volumes attached ({:?})", volumes.len(), source);
        Ok(Self { source, volumes })
    }
}

fn make_entry(
    vol_id: u32,
    name: Option<VolumeName>,
    layout: VolumeLayout,
    leb_size: u32,
) -> Option<VolumeEntry> {
    let usable_leb_size = leb_size.saturating_sub(layout.data_pad);
    if usable_leb_size == 0 {
        warn!("UBI: volume {} has no usable LEB space", vol_id);
        return None;
    }
    Some(VolumeEntry {
        vol_id,
        name,
        vol_type: layout.vol_type,
        usable_leb_size,
        used_ebs: layout.used_ebs,
        last_eb_bytes: layout.last_eb_bytes,
        eba: layout.eba,
    })
}

/// Read the volume table from LEB 0 of the layout volume, or LEB 1
fn read_volume_table<B: BootBackend>(
    reader: &mut PebReader<B>,
    layout: &VolumeLayout,
) -> Result<Vec<vtbl::VtblRecord>> {
    let leb_start = reader.geometry().leb_start;
    let mut raw = vec![0u8; vtbl::record_count(reader.leb_size()) * vtbl::VTBL_RECORD_SIZE];

    for copy in 0..2u32 {
        let Some(pnum) = layout.eba.get(copy as usize).copied().flatten() else {
            continue;
        };
        reader.read(pnum, leb_start, &mut raw)?;
        match vtbl::parse_table(&raw) {
            Some(records) => return Ok(records),
            None => warn!("UBI: volume table copy {} is corrupt", copy),
        }
    }

    warn!("UBI: no valid volume table");
    Ok(Vec::new())
}

/// Attach to the UBI volume store on a backend
///
/// With `fastmap` set, the fast index is tried first and the full scan runs
/// only if it is missing or fails validation.
pub fn attach<B: BootBackend>(reader: &mut PebReader<B>, fastmap: bool) -> Result<VolumeDirectory> {
    let fast = if fastmap {
        try_fast_index(reader)
    } else {
        None
    };
    let (map, source) = match fast {
        Some(map) => (map, AttachSource::FastIndex),
        None => (full_scan(reader)?, AttachSource::FullScan),
    };
    VolumeDirectory::build(reader, map, source)
}
