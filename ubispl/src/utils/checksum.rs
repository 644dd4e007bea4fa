//! Checksum calculations for validation
//!
//! Two CRC-32 flavours are on flash. UBI headers, the volume table and the
//! fastmap use the raw reflected CRC seeded with all ones and never inverted.
//! Legacy image headers and FIT hash nodes use the standard (zlib) CRC-32.

/// Reflected CRC-32 polynomial
const CRC32_POLY: u32 = 0xEDB8_8320;

/// Seed of every UBI on-flash checksum
pub const UBI_CRC32_INIT: u32 = 0xFFFF_FFFF;

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = make_table();

/// Raw CRC-32 update, no pre or post inversion
pub fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

/// Feed `count` zero bytes into a running CRC
fn crc32_update_zeros(mut crc: u32, count: usize) -> u32 {
    for _ in 0..count {
        crc = CRC32_TABLE[(crc & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

/// Raw update over `data` with `data[at..at + len]` read as zeros
///
/// Used for checksums stored inside the block they cover.
pub fn crc32_update_zeroed(crc: u32, data: &[u8], at: usize, len: usize) -> u32 {
    let end = (at + len).min(data.len());
    let at = at.min(end);
    let crc = crc32_update(crc, &data[..at]);
    let crc = crc32_update_zeros(crc, end - at);
    crc32_update(crc, &data[end..])
}

/// UBI CRC: seeded with all ones, not inverted
pub fn ubi_crc32(data: &[u8]) -> u32 {
    crc32_update(UBI_CRC32_INIT, data)
}

/// Standard CRC-32 (zlib, IEEE 802.3)
pub fn crc32(data: &[u8]) -> u32 {
    !crc32_update(!0, data)
}

/// Standard CRC-32 with a zeroed field
pub fn crc32_zeroed(data: &[u8], at: usize, len: usize) -> u32 {
    !crc32_update_zeroed(!0, data, at, len)
}
