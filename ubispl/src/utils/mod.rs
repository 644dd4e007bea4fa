//! Shared helpers: checksums and big-endian field access

pub mod bytes;
pub mod checksum;
