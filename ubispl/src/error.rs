//! Error types for UBI image loading

use crate::types::{BootDeviceKind, VolumeSelector};
use core::fmt;
use thiserror::Error;

/// Result type for image loading operations
pub type Result<T> = core::result::Result<T, SplError>;

/// Checksum that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// Legacy image header CRC
    ImageHeader,
    /// Legacy image payload CRC
    ImageData,
    /// Container sub-image hash
    SubImage,
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageHeader => f.write_str("image header"),
            Self::ImageData => f.write_str("image data"),
            Self::SubImage => f.write_str("sub-image"),
        }
    }
}

/// Errors that can occur while resolving a boot image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplError {
    /// Requested boot device is not registered in this build
    #[error("boot device {0} is not supported")]
    BackendUnsupported(BootDeviceKind),

    /// No boot device was listed
    #[error("no boot device to try")]
    NoBootDevice,

    /// A device block read failed
    #[error("block read failed at LBA {lba}")]
    BackendReadError {
        /// First block of the failed request
        lba: u64,
    },

    /// PEB number outside the UBI area
    #[error("PEB {pnum} outside UBI area of {count} PEBs")]
    PebOutOfRange {
        /// Requested PEB
        pnum: u32,
        /// PEBs in the area
        count: u32,
    },

    /// Backend geometry cannot describe a UBI device
    #[error("invalid flash geometry: {0}")]
    InvalidGeometry(&'static str),

    /// No directory entry matches
    #[error("volume {0} not found")]
    VolumeNotFound(VolumeSelector),

    /// Read past the logical end of a volume
    #[error("read of {len} bytes at {offset} passes volume end ({size} bytes)")]
    VolumeOverrun {
        /// Requested offset
        offset: u64,
        /// Requested length
        len: u64,
        /// Logical volume size
        size: u64,
    },

    /// Header magic is not a known image format
    #[error("unrecognized image magic {0:#010x}")]
    UnrecognizedFormat(u32),

    /// Image declares more bytes than its volume holds
    #[error("image declares {declared} bytes, only {available} available")]
    ContainerSizeExceeded {
        /// Declared size
        declared: u64,
        /// Bytes backing the image
        available: u64,
    },

    /// Structural checksum failed
    #[error("{0} checksum mismatch")]
    ChecksumMismatch(ChecksumKind),

    /// Declared placement does not fit caller-provided memory
    #[error("{size} bytes at {addr:#x} do not fit the load region")]
    DestinationOverflow {
        /// Requested start address
        addr: u64,
        /// Requested length
        size: u64,
    },

    /// Container structure is inconsistent
    #[error("malformed container: {0}")]
    MalformedContainer(&'static str),

    /// Container lacks a mandatory image
    #[error("container has no {0} image")]
    MissingImage(&'static str),

    /// Sub-image is compressed
    #[error("compressed sub-images are not supported")]
    UnsupportedCompression,

    /// Container resolution requested beyond the depth bound
    #[error("containers nest at most {0} level(s)")]
    ContainerDepthExceeded(u8),
}
