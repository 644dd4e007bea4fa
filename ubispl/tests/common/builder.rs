//! Builders for synthetic UBI flash images, legacy images and FIT containers

use super::MemoryBlockDevice;
use std::collections::BTreeMap;
use ubispl::types::{UBI_FM_SB_VOLUME_ID, UBI_LAYOUT_VOLUME_ID};
use ubispl::utils::checksum::{crc32, ubi_crc32};
use ubispl::{FlashGeometry, VolumeType};

pub const PEB_SIZE: u32 = 16 * 1024;
pub const VID_OFFSET: u32 = 2048;
pub const LEB_START: u32 = 4096;
pub const LEB_SIZE: u32 = PEB_SIZE - LEB_START;

const VTBL_RECORD_SIZE: usize = 172;

/// Geometry shared by every test image
pub fn geometry(peb_count: u32) -> FlashGeometry {
    FlashGeometry {
        peb_size: PEB_SIZE,
        vid_offset: VID_OFFSET,
        leb_start: LEB_START,
        peb_offset: 0,
        peb_count,
    }
}

fn put32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_be_bytes());
}

fn put64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_be_bytes());
}

struct Volume {
    id: u32,
    name: String,
    vol_type: VolumeType,
    lebs: Vec<Option<Vec<u8>>>,
}

impl Volume {
    fn reserved_pebs(&self) -> u32 {
        match self.vol_type {
            VolumeType::Static => self.lebs.len().max(1) as u32,
            // Leave unmapped room at the end of dynamic volumes
            VolumeType::Dynamic => self.lebs.len() as u32 + 2,
        }
    }

    fn used_ebs(&self) -> u32 {
        self.lebs.len() as u32
    }

    fn last_eb_bytes(&self) -> u32 {
        match self.lebs.last() {
            Some(Some(data)) => data.len() as u32,
            _ => 0,
        }
    }
}

struct Vid {
    vol_type: u8,
    vol_id: u32,
    lnum: u32,
    data_size: u32,
    used_ebs: u32,
    data_crc: u32,
    sqnum: u64,
}

/// A built flash image plus where things landed
#[derive(Debug, Clone)]
pub struct UbiImage {
    pub data: Vec<u8>,
    pub geometry: FlashGeometry,
    pub fastmap_anchor: Option<u32>,
    pub layout_pebs: [u32; 2],
    /// Newest PEB of each `(vol_id, lnum)`
    pub placements: BTreeMap<(u32, u32), u32>,
}

impl UbiImage {
    pub fn device(&self) -> MemoryBlockDevice {
        MemoryBlockDevice::new(self.data.clone())
    }

    pub fn peb_mut(&mut self, pnum: u32) -> &mut [u8] {
        let start = pnum as usize * PEB_SIZE as usize;
        &mut self.data[start..start + PEB_SIZE as usize]
    }

    /// Flip one byte of a PEB
    pub fn corrupt(&mut self, pnum: u32, offset: u32) {
        self.peb_mut(pnum)[offset as usize] ^= 0x5A;
    }

    pub fn pnum(&self, vol_id: u32, lnum: u32) -> u32 {
        self.placements[&(vol_id, lnum)]
    }
}

/// Writes UBI images the way the kernel leaves them
pub struct UbiBuilder {
    peb_count: u32,
    volumes: Vec<Volume>,
    updates: Vec<(u32, u32, Vec<u8>)>,
    fastmap: bool,
}

impl UbiBuilder {
    pub fn new(peb_count: u32) -> Self {
        Self {
            peb_count,
            volumes: Vec::new(),
            updates: Vec::new(),
            fastmap: false,
        }
    }

    fn split(data: &[u8]) -> Vec<Option<Vec<u8>>> {
        data.chunks(LEB_SIZE as usize)
            .map(|c| Some(c.to_vec()))
            .collect()
    }

    pub fn static_volume(mut self, id: u32, name: &str, data: &[u8]) -> Self {
        self.volumes.push(Volume {
            id,
            name: name.to_string(),
            vol_type: VolumeType::Static,
            lebs: Self::split(data),
        });
        self
    }

    pub fn dynamic_volume(self, id: u32, name: &str, data: &[u8]) -> Self {
        let lebs = Self::split(data);
        self.dynamic_lebs(id, name, lebs)
    }

    /// Dynamic volume with explicit, possibly unmapped, LEBs
    pub fn dynamic_lebs(mut self, id: u32, name: &str, lebs: Vec<Option<Vec<u8>>>) -> Self {
        self.volumes.push(Volume {
            id,
            name: name.to_string(),
            vol_type: VolumeType::Dynamic,
            lebs,
        });
        self
    }

    /// Rewrite a LEB after the fastmap snapshot
    pub fn update(mut self, vol_id: u32, lnum: u32, data: &[u8]) -> Self {
        self.updates.push((vol_id, lnum, data.to_vec()));
        self
    }

    pub fn with_fastmap(mut self) -> Self {
        self.fastmap = true;
        self
    }

    fn ec_header() -> [u8; 64] {
        let mut hdr = [0u8; 64];
        put32(&mut hdr, 0, 0x5542_4923);
        hdr[4] = 1;
        put64(&mut hdr, 8, 1);
        put32(&mut hdr, 16, VID_OFFSET);
        put32(&mut hdr, 20, LEB_START);
        put32(&mut hdr, 24, 0x1234);
        let crc = ubi_crc32(&hdr[..60]);
        put32(&mut hdr, 60, crc);
        hdr
    }

    fn vid_header(vid: &Vid) -> [u8; 64] {
        let mut hdr = [0u8; 64];
        put32(&mut hdr, 0, 0x5542_4921);
        hdr[4] = 1;
        hdr[5] = vid.vol_type;
        put32(&mut hdr, 8, vid.vol_id);
        put32(&mut hdr, 12, vid.lnum);
        put32(&mut hdr, 20, vid.data_size);
        put32(&mut hdr, 24, vid.used_ebs);
        put32(&mut hdr, 32, vid.data_crc);
        put64(&mut hdr, 40, vid.sqnum);
        let crc = ubi_crc32(&hdr[..60]);
        put32(&mut hdr, 60, crc);
        hdr
    }

    fn write_peb(img: &mut [u8], pnum: u32, vid: Option<&Vid>, data: &[u8]) {
        let peb = &mut img[pnum as usize * PEB_SIZE as usize..][..PEB_SIZE as usize];
        peb[..64].copy_from_slice(&Self::ec_header());
        if let Some(vid) = vid {
            peb[VID_OFFSET as usize..VID_OFFSET as usize + 64].copy_from_slice(&Self::vid_header(vid));
        }
        peb[LEB_START as usize..LEB_START as usize + data.len()].copy_from_slice(data);
    }

    fn volume_table(&self) -> Vec<u8> {
        let count = std::cmp::min(128, LEB_SIZE as usize / VTBL_RECORD_SIZE);
        let mut table = vec![0u8; count * VTBL_RECORD_SIZE];
        for (i, rec) in table.chunks_exact_mut(VTBL_RECORD_SIZE).enumerate() {
            if let Some(vol) = self.volumes.iter().find(|v| v.id == i as u32) {
                put32(rec, 0, vol.reserved_pebs());
                put32(rec, 4, 1);
                rec[12] = match vol.vol_type {
                    VolumeType::Dynamic => 3,
                    VolumeType::Static => 4,
                };
                rec[14..16].copy_from_slice(&(vol.name.len() as u16).to_be_bytes());
                rec[16..16 + vol.name.len()].copy_from_slice(vol.name.as_bytes());
            }
            let crc = ubi_crc32(&rec[..168]);
            put32(rec, 168, crc);
        }
        table
    }

    fn vid_for(vol: &Volume, lnum: u32, data: &[u8], sqnum: u64) -> Vid {
        match vol.vol_type {
            VolumeType::Static => Vid {
                vol_type: 2,
                vol_id: vol.id,
                lnum,
                data_size: data.len() as u32,
                used_ebs: vol.used_ebs(),
                data_crc: ubi_crc32(data),
                sqnum,
            },
            VolumeType::Dynamic => Vid {
                vol_type: 1,
                vol_id: vol.id,
                lnum,
                data_size: 0,
                used_ebs: 0,
                data_crc: 0,
                sqnum,
            },
        }
    }

    pub fn build(self) -> UbiImage {
        let geometry = geometry(self.peb_count);
        let mut img = vec![0xFFu8; self.peb_count as usize * PEB_SIZE as usize];
        let mut next = 0u32;
        let mut sqnum = 0u64;
        let mut placements = BTreeMap::new();

        let anchor = if self.fastmap {
            next += 1;
            Some(0)
        } else {
            None
        };

        let table = self.volume_table();
        let mut layout_pebs = [0u32; 2];
        for (lnum, slot) in layout_pebs.iter_mut().enumerate() {
            sqnum += 1;
            let vid = Vid {
                vol_type: 1,
                vol_id: UBI_LAYOUT_VOLUME_ID,
                lnum: lnum as u32,
                data_size: 0,
                used_ebs: 0,
                data_crc: 0,
                sqnum,
            };
            Self::write_peb(&mut img, next, Some(&vid), &table);
            *slot = next;
            next += 1;
        }

        for vol in &self.volumes {
            for (lnum, leb) in vol.lebs.iter().enumerate() {
                let Some(data) = leb else { continue };
                sqnum += 1;
                let vid = Self::vid_for(vol, lnum as u32, data, sqnum);
                Self::write_peb(&mut img, next, Some(&vid), data);
                placements.insert((vol.id, lnum as u32), next);
                next += 1;
            }
        }

        let snapshot = placements.clone();
        let used_at_snapshot = next;
        sqnum += 1;
        let fm_sqnum = sqnum;

        let mut pool = Vec::new();
        for (vol_id, lnum, data) in &self.updates {
            let vol = self
                .volumes
                .iter()
                .find(|v| v.id == *vol_id)
                .expect("update of unknown volume");
            sqnum += 1;
            let vid = Self::vid_for(vol, *lnum, data, sqnum);
            Self::write_peb(&mut img, next, Some(&vid), data);
            placements.insert((*vol_id, *lnum), next);
            pool.push(next);
            next += 1;
        }

        assert!(next <= self.peb_count, "image does not fit");
        for pnum in next..self.peb_count {
            Self::write_peb(&mut img, pnum, None, &[]);
        }

        if let Some(anchor) = anchor {
            let fm = self.fastmap_leb(anchor, fm_sqnum, used_at_snapshot, &layout_pebs, &snapshot, &pool);
            let vid = Vid {
                vol_type: 1,
                vol_id: UBI_FM_SB_VOLUME_ID,
                lnum: 0,
                data_size: 0,
                used_ebs: 0,
                data_crc: 0,
                sqnum: fm_sqnum,
            };
            Self::write_peb(&mut img, anchor, Some(&vid), &fm);
        }

        UbiImage {
            data: img,
            geometry,
            fastmap_anchor: anchor,
            layout_pebs,
            placements,
        }
    }

    fn fastmap_leb(
        &self,
        anchor: u32,
        fm_sqnum: u64,
        used: u32,
        layout_pebs: &[u32; 2],
        snapshot: &BTreeMap<(u32, u32), u32>,
        pool: &[u32],
    ) -> Vec<u8> {
        let mut fm = vec![0u8; LEB_SIZE as usize];

        // Superblock
        put32(&mut fm, 0, 0x7B11_D69F);
        fm[4] = 2;
        put32(&mut fm, 12, 1);
        put32(&mut fm, 16, anchor);
        put32(&mut fm, 144, 1);
        put64(&mut fm, 272, fm_sqnum);

        // Header
        let free = self.peb_count - used;
        let vol_count = self.volumes.len() as u32 + 1;
        put32(&mut fm, 312, 0xD4B8_2EF7);
        put32(&mut fm, 316, free);
        put32(&mut fm, 320, used);
        put32(&mut fm, 336, vol_count);

        // Pools
        let mut pos = 344;
        for pebs in [pool, &[][..]] {
            put32(&mut fm, pos, 0x67AF_4D08);
            fm[pos + 4..pos + 6].copy_from_slice(&(pebs.len() as u16).to_be_bytes());
            fm[pos + 6..pos + 8].copy_from_slice(&256u16.to_be_bytes());
            for (i, &pnum) in pebs.iter().enumerate() {
                put32(&mut fm, pos + 8 + i * 4, pnum);
            }
            pos += 1048;
        }

        // Erase counters, free then used
        for pnum in (used..self.peb_count).chain(0..used) {
            put32(&mut fm, pos, pnum);
            put32(&mut fm, pos + 4, 1);
            pos += 8;
        }

        // Layout volume, then user volumes
        let mut write_volume = |fm: &mut Vec<u8>,
                                vol_id: u32,
                                vol_type: u8,
                                used_ebs: u32,
                                last_eb_bytes: u32,
                                eba: Vec<i32>| {
            put32(fm, pos, 0xFA37_0ED1);
            put32(fm, pos + 4, vol_id);
            fm[pos + 8] = vol_type;
            put32(fm, pos + 16, used_ebs);
            put32(fm, pos + 20, last_eb_bytes);
            pos += 32;
            put32(fm, pos, 0xF0C0_40A8);
            put32(fm, pos + 4, eba.len() as u32);
            pos += 8;
            for pnum in eba {
                put32(fm, pos, pnum as u32);
                pos += 4;
            }
        };

        write_volume(
            &mut fm,
            UBI_LAYOUT_VOLUME_ID,
            1,
            2,
            LEB_SIZE,
            layout_pebs.iter().map(|&p| p as i32).collect(),
        );
        for vol in &self.volumes {
            let eba: Vec<i32> = (0..vol.reserved_pebs())
                .map(|lnum| snapshot.get(&(vol.id, lnum)).map_or(-1, |&p| p as i32))
                .collect();
            match vol.vol_type {
                VolumeType::Static => {
                    write_volume(&mut fm, vol.id, 2, vol.used_ebs(), vol.last_eb_bytes(), eba)
                }
                VolumeType::Dynamic => {
                    write_volume(&mut fm, vol.id, 1, vol.reserved_pebs(), LEB_SIZE, eba)
                }
            }
        }

        let crc = ubi_crc32(&fm);
        put32(&mut fm, 8, crc);
        fm
    }
}

/// Legacy image with a valid header and payload CRC
pub fn legacy_image(os: u8, load: u32, ep: u32, name: &str, payload: &[u8]) -> Vec<u8> {
    let mut hdr = [0u8; 64];
    put32(&mut hdr, 0, 0x2705_1956);
    put32(&mut hdr, 8, 1_700_000_000);
    put32(&mut hdr, 12, payload.len() as u32);
    put32(&mut hdr, 16, load);
    put32(&mut hdr, 20, ep);
    put32(&mut hdr, 24, crc32(payload));
    hdr[28] = os;
    hdr[29] = 2; // ARM
    hdr[30] = 2; // kernel
    hdr[32..32 + name.len()].copy_from_slice(name.as_bytes());
    let hcrc = crc32(&hdr);
    put32(&mut hdr, 4, hcrc);

    let mut out = hdr.to_vec();
    out.extend_from_slice(payload);
    out
}

/// One FIT sub-image
#[derive(Debug, Clone)]
pub struct FitImage {
    pub name: String,
    pub data: Vec<u8>,
    pub load: Option<u64>,
    pub entry: Option<u64>,
    pub os: Option<String>,
    pub compression: Option<String>,
    pub crc: Option<u32>,
    pub inline: bool,
}

impl FitImage {
    pub fn new(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            load: None,
            entry: None,
            os: None,
            compression: None,
            crc: None,
            inline: false,
        }
    }

    pub fn load(mut self, addr: u64) -> Self {
        self.load = Some(addr);
        self
    }

    pub fn entry(mut self, addr: u64) -> Self {
        self.entry = Some(addr);
        self
    }

    pub fn os(mut self, os: &str) -> Self {
        self.os = Some(os.to_string());
        self
    }

    pub fn compression(mut self, comp: &str) -> Self {
        self.compression = Some(comp.to_string());
        self
    }

    pub fn with_crc(mut self) -> Self {
        self.crc = Some(crc32(&self.data));
        self
    }

    pub fn with_bad_crc(mut self) -> Self {
        self.crc = Some(crc32(&self.data) ^ 1);
        self
    }

    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }
}

/// Structure and strings blocks of an FDT under construction
struct FdtWriter {
    structs: Vec<u8>,
    strings: Vec<u8>,
}

impl FdtWriter {
    fn pad(&mut self) {
        while self.structs.len() % 4 != 0 {
            self.structs.push(0);
        }
    }

    fn token(&mut self, t: u32) {
        self.structs.extend_from_slice(&t.to_be_bytes());
    }

    fn begin(&mut self, name: &str) {
        self.token(1);
        self.structs.extend_from_slice(name.as_bytes());
        self.structs.push(0);
        self.pad();
    }

    fn end(&mut self) {
        self.token(2);
    }

    fn prop(&mut self, name: &str, value: &[u8]) {
        let nameoff = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.token(3);
        self.structs.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.structs.extend_from_slice(&nameoff.to_be_bytes());
        self.structs.extend_from_slice(value);
        self.pad();
    }

    fn prop_str(&mut self, name: &str, value: &str) {
        let mut v = value.as_bytes().to_vec();
        v.push(0);
        self.prop(name, &v);
    }

    fn prop_u32(&mut self, name: &str, value: u32) {
        self.prop(name, &value.to_be_bytes());
    }

    fn prop_addr(&mut self, name: &str, value: u64) {
        match u32::try_from(value) {
            Ok(v) => self.prop_u32(name, v),
            Err(_) => self.prop(name, &value.to_be_bytes()),
        }
    }
}

/// Builds FIT containers with external or inline data
#[derive(Debug, Clone, Default)]
pub struct FitBuilder {
    images: Vec<FitImage>,
    firmware: Option<String>,
    fdt: Option<String>,
}

impl FitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(mut self, image: FitImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn firmware(mut self, name: &str) -> Self {
        self.firmware = Some(name.to_string());
        self
    }

    pub fn fdt(mut self, name: &str) -> Self {
        self.fdt = Some(name.to_string());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut w = FdtWriter {
            structs: Vec::new(),
            strings: Vec::new(),
        };

        w.begin("");
        w.prop_str("description", "test image");
        w.prop_u32("#address-cells", 1);

        w.begin("images");
        let mut external = Vec::new();
        for img in &self.images {
            w.begin(&img.name);
            w.prop_str("type", "firmware");
            if img.inline {
                w.prop("data", &img.data);
            } else {
                let offset: usize = external.iter().map(|d: &Vec<u8>| (d.len() + 3) & !3).sum();
                w.prop_u32("data-offset", offset as u32);
                w.prop_u32("data-size", img.data.len() as u32);
                external.push(img.data.clone());
            }
            if let Some(load) = img.load {
                w.prop_addr("load", load);
            }
            if let Some(entry) = img.entry {
                w.prop_addr("entry", entry);
            }
            if let Some(os) = &img.os {
                w.prop_str("os", os);
            }
            if let Some(comp) = &img.compression {
                w.prop_str("compression", comp);
            }
            if let Some(crc) = img.crc {
                w.begin("hash-1");
                w.prop_str("algo", "crc32");
                w.prop_u32("value", crc);
                w.end();
            }
            w.end();
        }
        w.end();

        w.begin("configurations");
        w.prop_str("default", "conf-1");
        w.begin("conf-1");
        if let Some(fw) = &self.firmware {
            w.prop_str("firmware", fw);
        }
        if let Some(fdt) = &self.fdt {
            w.prop_str("fdt", fdt);
        }
        w.end();
        w.end();

        w.end();
        w.token(9);

        let off_rsvmap = 40usize;
        let off_struct = off_rsvmap + 16;
        let off_strings = off_struct + w.structs.len();
        let totalsize = off_strings + w.strings.len();

        let mut blob = vec![0u8; 40];
        let fields = [
            0xD00D_FEED,
            totalsize as u32,
            off_struct as u32,
            off_strings as u32,
            off_rsvmap as u32,
            17,
            16,
            0,
            w.strings.len() as u32,
            w.structs.len() as u32,
        ];
        for (i, v) in fields.iter().enumerate() {
            put32(&mut blob, i * 4, *v);
        }
        blob.extend_from_slice(&[0u8; 16]);
        blob.extend_from_slice(&w.structs);
        blob.extend_from_slice(&w.strings);

        for data in external {
            while blob.len() % 4 != 0 {
                blob.push(0);
            }
            blob.extend_from_slice(&data);
        }
        blob
    }

    /// Size of the FDT part, before external data
    pub fn totalsize(blob: &[u8]) -> usize {
        u32::from_be_bytes([blob[4], blob[5], blob[6], blob[7]]) as usize
    }
}
