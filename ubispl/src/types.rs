//! Common types and constants for UBI image loading

use crate::error::{Result, SplError};
use core::fmt;

/// Size of the EC and VID headers
pub const UBI_HEADER_SIZE: usize = 64;

/// Maximum number of user volumes (volume table records)
pub const UBI_MAX_VOLUMES: usize = 128;

/// Maximum volume name length, excluding the terminating NUL
pub const UBI_VOL_NAME_MAX: usize = 127;

/// First volume id reserved for UBI internal volumes
pub const UBI_INTERNAL_VOL_START: u32 = 0x7FFF_FFFF - 4096;

/// Layout volume (holds the two volume table copies)
pub const UBI_LAYOUT_VOLUME_ID: u32 = UBI_INTERNAL_VOL_START;

/// Fastmap anchor (superblock) volume
pub const UBI_FM_SB_VOLUME_ID: u32 = UBI_INTERNAL_VOL_START + 1;

/// Fastmap data volume
pub const UBI_FM_DATA_VOLUME_ID: u32 = UBI_INTERNAL_VOL_START + 2;

/// The fastmap anchor lives within this many PEBs of the start
pub const UBI_FM_MAX_START: u32 = 64;

/// Containers are resolved at most this many levels deep
pub const MAX_CONTAINER_DEPTH: u8 = 1;

/// Boot device kinds a board may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootDeviceKind {
    /// Parallel NAND
    Nand,
    /// Serial (SPI) NAND
    SpiNand,
    /// OneNAND
    OneNand,
}

impl BootDeviceKind {
    /// Name used in boot messages
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Nand => "NAND",
            Self::SpiNand => "SPINAND",
            Self::OneNand => "OneNAND",
        }
    }
}

impl fmt::Display for BootDeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where UBI lives on a backend and how its erase blocks are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    /// Physical erase block size in bytes
    pub peb_size: u32,

    /// Offset of the VID header inside each PEB
    pub vid_offset: u32,

    /// Offset of LEB data inside each PEB
    pub leb_start: u32,

    /// First PEB of the UBI area on the device
    pub peb_offset: u32,

    /// Number of PEBs in the UBI area
    pub peb_count: u32,
}

impl FlashGeometry {
    /// Logical erase block size
    pub const fn leb_size(&self) -> u32 {
        self.peb_size - self.leb_start
    }

    /// Check the layout is usable for reading
    pub fn validate(&self) -> Result<()> {
        if self.peb_count == 0 {
            return Err(SplError::InvalidGeometry("no PEBs"));
        }
        if self.vid_offset < UBI_HEADER_SIZE as u32 {
            return Err(SplError::InvalidGeometry("VID header overlaps EC header"));
        }
        if self.vid_offset as u64 + UBI_HEADER_SIZE as u64 > self.leb_start as u64 {
            return Err(SplError::InvalidGeometry("VID header overlaps LEB data"));
        }
        if self.leb_start >= self.peb_size {
            return Err(SplError::InvalidGeometry("LEB start beyond PEB"));
        }
        Ok(())
    }
}

/// Volume type as recorded on flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    /// Read-write volume, size fixed by reserved LEBs
    Dynamic,
    /// Read-only volume with exact data size
    Static,
}

/// Fixed-capacity volume name (exact byte match, no case folding)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VolumeName {
    len: u8,
    bytes: [u8; UBI_VOL_NAME_MAX + 1],
}

impl VolumeName {
    /// Build from raw bytes, `None` if longer than 127 bytes
    pub fn from_bytes(name: &[u8]) -> Option<Self> {
        if name.len() > UBI_VOL_NAME_MAX {
            return None;
        }
        let mut bytes = [0u8; UBI_VOL_NAME_MAX + 1];
        bytes[..name.len()].copy_from_slice(name);
        Some(Self {
            len: name.len() as u8,
            bytes,
        })
    }

    /// Build from a string
    pub fn new(name: &str) -> Option<Self> {
        Self::from_bytes(name.as_bytes())
    }

    /// Name bytes without padding
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(self.as_bytes()) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:02x?}", self.as_bytes()),
        }
    }
}

impl fmt::Debug for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeName(\"{}\")", self)
    }
}

/// How a volume is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeSelector {
    /// Numeric volume id
    Id(u32),
    /// Exact volume name
    Name(VolumeName),
}

impl VolumeSelector {
    /// Select by name, `None` if longer than 127 bytes
    pub fn name(name: &str) -> Option<Self> {
        VolumeName::new(name).map(Self::Name)
    }
}

impl fmt::Display for VolumeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {}", id),
            Self::Name(name) => write!(f, "\"{}\"", name),
        }
    }
}

/// Image format discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Fixed 64-byte header image
    Legacy,
    /// Self-describing multi-image container (FIT)
    Container,
}

/// Operating system an image targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOs {
    /// Linux kernel
    Linux,
    /// U-Boot proper (the monitor)
    UBoot,
    /// Any other OS code, 0 when unknown
    Other(u8),
}

impl ImageOs {
    /// Legacy header OS code for Linux
    pub const IH_OS_LINUX: u8 = 5;

    /// Legacy header OS code for U-Boot
    pub const IH_OS_U_BOOT: u8 = 17;

    /// Decode a legacy header `ih_os` byte
    pub fn from_ih_os(os: u8) -> Self {
        match os {
            Self::IH_OS_LINUX => Self::Linux,
            Self::IH_OS_U_BOOT => Self::UBoot,
            other => Self::Other(other),
        }
    }

    /// Decode a FIT `os` property
    pub fn from_fit_name(name: &str) -> Self {
        match name {
            "linux" => Self::Linux,
            "u-boot" => Self::UBoot,
            _ => Self::Other(0),
        }
    }
}

/// Parsed description of a loaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Header format
    pub kind: ImageKind,

    /// Target OS
    pub os: ImageOs,

    /// Address the payload is linked for
    pub load_addr: u64,

    /// Address to jump to
    pub entry_point: u64,

    /// Payload size in bytes
    pub size: u64,

    /// Address where the payload bytes currently sit
    pub data_addr: u64,
}

/// A payload placed in target memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    /// First byte
    pub load_addr: u64,

    /// Length in bytes
    pub size: u64,
}

/// Which tier produced the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPath {
    /// Kernel and argument volumes
    Os,
    /// Fallback monitor volume
    Monitor,
}

/// Result of one successful resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    /// Device the image came from
    pub device: BootDeviceKind,

    /// Tier that succeeded
    pub path: BootPath,

    /// Ready-to-jump image
    pub info: ImageInfo,

    /// Argument blob (OS path only)
    pub args: Option<Payload>,

    /// Auxiliary container payload, when requested and present
    pub aux: Option<Payload>,

    /// Why the OS tier was abandoned, if it was tried
    pub fallback: Option<SplError>,
}
