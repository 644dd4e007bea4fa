//! UBI boot image loader
//!
//! A `no_std` secondary-stage loader that finds a bootable image in a UBI
//! volume store on raw flash and hands back a ready-to-jump descriptor.
//!
//! # Overview
//!
//! UBI spreads each logical volume over physical erase blocks (PEBs) in an
//! order only the on-flash headers know. This crate provides:
//! - Backend selection over any block-read device, with select/deselect
//!   lifecycle hooks
//! - Volume store attach, through the fastmap when it validates and a full
//!   PEB scan otherwise
//! - Byte-level volume reads
//! - Legacy (uImage) header parsing and FIT container resolution
//! - The boot policy: OS kernel plus arguments first, monitor as fallback
//!
//! # Architecture
//!
//! The implementation is layered:
//! 1. **Backend layer** - registry, lifecycle guard and PEB reads
//! 2. **UBI layer** - headers, volume table, fastmap, scan and volume reads
//! 3. **Image layer** - format sniffing, legacy images and FIT containers
//! 4. **Boot layer** - the resolution policy
//!
//! # Usage
//!
//! ```ignore
//! use ubispl::{BackendRegistry, BlockIoBackend, BootDeviceKind, LoadRegion, LoadTargets, LoaderConfig};
//!
//! let mut registry = BackendRegistry::new();
//! registry.register(0, BlockIoBackend::new(BootDeviceKind::Nand, nand, geometry));
//!
//! let mut targets = LoadTargets {
//!     image: LoadRegion::new(0x8200_0000, image_buf),
//!     args: LoadRegion::new(0x8800_0000, args_buf),
//!     sub_images: vec![LoadRegion::new(0x8780_0000, dram)],
//! };
//! let image = ubispl::resolve(&mut registry, BootDeviceKind::Nand, &LoaderConfig::default(), &mut targets)?;
//! jump_to(image.info.entry_point);
//! ```

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

pub mod backend;
pub mod boot;
pub mod error;
pub mod image;
pub mod region;
pub mod types;
pub mod ubi;
pub mod utils;

pub use error::{ChecksumKind, Result, SplError};
pub use types::{
    BootDeviceKind, BootImage, BootPath, FlashGeometry, ImageInfo, ImageKind, ImageOs, Payload,
    VolumeName, VolumeSelector, VolumeType,
};

// High-level API exports
pub use backend::{BackendRegistry, BlockIoBackend, BootBackend, PebReader, SelectedBackend};
pub use boot::{boot_from_devices, resolve, BootStage, LoadTargets, LoaderConfig};
pub use image::{parse_header, ImageHeader, ImageSource};
pub use region::LoadRegion;
pub use ubi::{attach, VolumeDirectory, VolumeEntry, VolumeReader};
