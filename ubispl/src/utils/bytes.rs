//! Big-endian field access and alignment
//!
//! Every on-flash structure this crate reads (UBI headers, fastmap, legacy
//! image headers, flattened device trees) is big-endian. Callers check the
//! buffer length once up front; these helpers index directly.

/// Read a big-endian `u16` at `offset`
pub fn be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Read a big-endian `u32` at `offset`
pub fn be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Read a big-endian `u64` at `offset`
pub fn be64(data: &[u8], offset: usize) -> u64 {
    (be32(data, offset) as u64) << 32 | be32(data, offset + 4) as u64
}

/// Checked big-endian `u32` read
pub fn get_be32(data: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    if end > data.len() {
        return None;
    }
    Some(be32(data, offset))
}

/// True if every byte is 0xFF (erased flash)
pub fn is_erased(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0xFF)
}

/// Round `value` up to a power-of-two `align`
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}
