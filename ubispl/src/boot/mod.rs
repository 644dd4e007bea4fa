//! Boot image resolution
//!
//! One resolution attempt walks these stages:
//!
//! ```text
//! SelectBackend -> AttachVolumeStore -> TryOsBoot --ok--> Done
//!                                           |
//!                                        fallback
//!                                           v
//!                  TryMonitorBoot -> ParseAndMaybeContainer -> Done
//!                  (any error on this side -> Failed)
//! ```
//!
//! `TryOsBoot` runs only when the configuration allows it. Its volume
//! errors (missing volume, read failure, volume too large for its region)
//! turn into a fallback to the monitor. A kernel that is read but does not
//! parse is terminal. The backend is deselected exactly once on every
//! terminal transition.

pub mod config;

pub use config::LoaderConfig;

use crate::backend::{BackendRegistry, BootBackend, PebReader};
use crate::error::{Result, SplError};
use crate::image::{
    load_container, load_legacy, parse_header, FdtHeader, ImageHeader, ImageSource, LegacyHeader,
    MemoryImage, VolumeImage,
};
use crate::region::LoadRegion;
use crate::types::{BootDeviceKind, BootImage, BootPath, ImageInfo, Payload, MAX_CONTAINER_DEPTH};
use crate::ubi::{self, VolumeDirectory, VolumeReader};
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info, warn};

/// Stages of a resolution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    /// Look up and bring up the backend
    SelectBackend,
    /// Build the volume directory
    AttachVolumeStore,
    /// Load kernel and arguments
    TryOsBoot,
    /// Load the monitor volume
    TryMonitorBoot,
    /// Parse the monitor image, resolving containers
    ParseAndMaybeContainer,
    /// Image ready
    Done,
    /// Attempt failed
    Failed,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SelectBackend => "select backend",
            Self::AttachVolumeStore => "attach volume store",
            Self::TryOsBoot => "try OS boot",
            Self::TryMonitorBoot => "try monitor boot",
            Self::ParseAndMaybeContainer => "parse image",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Memory the loader may write
pub struct LoadTargets<'a> {
    /// Kernel or monitor image
    pub image: LoadRegion<'a>,
    /// OS argument blob
    pub args: LoadRegion<'a>,
    /// Destinations for container sub-images
    pub sub_images: Vec<LoadRegion<'a>>,
}

fn enter(kind: BootDeviceKind, stage: BootStage) {
    debug!("{}: {}", kind, stage);
}

/// Outcome of the OS tier that does not end the attempt
enum OsAttempt {
    Loaded(ImageInfo, Payload),
    Fallback(SplError),
}

/// Resolve a boot image from one device
pub fn resolve(
    registry: &mut BackendRegistry<'_>,
    kind: BootDeviceKind,
    config: &LoaderConfig,
    targets: &mut LoadTargets<'_>,
) -> Result<BootImage> {
    enter(kind, BootStage::SelectBackend);
    let mut selected = registry.select(kind)?;

    let result = {
        let mut reader = PebReader::new(selected.backend())?;
        run(kind, &mut reader, config, targets)
    };

    match &result {
        Ok(image) => debug!(
            "{}: {}, entry {:#x}, {} bytes",
            kind,
            BootStage::Done,
            image.info.entry_point,
            image.info.size
        ),
        Err(e) => warn!("{}: {}: {}", kind, BootStage::Failed, e),
    }
    result
}

fn run<B: BootBackend>(
    kind: BootDeviceKind,
    reader: &mut PebReader<B>,
    config: &LoaderConfig,
    targets: &mut LoadTargets<'_>,
) -> Result<BootImage> {
    enter(kind, BootStage::AttachVolumeStore);
    let dir = ubi::attach(reader, config.fastmap)?;

    let mut fallback = None;
    if config.os_boot {
        enter(kind, BootStage::TryOsBoot);
        match try_os_boot(&dir, reader, config, targets)? {
            OsAttempt::Loaded(info, args) => {
                info!("{}: Linux loaded", kind);
                return Ok(BootImage {
                    device: kind,
                    path: BootPath::Os,
                    info,
                    args: Some(args),
                    aux: None,
                    fallback: None,
                });
            }
            OsAttempt::Fallback(e) => {
                warn!("{}: loading Linux failed ({}), falling back to monitor", kind, e);
                fallback = Some(e);
            }
        }
    }

    enter(kind, BootStage::TryMonitorBoot);
    let (info, aux) = load_monitor(kind, &dir, reader, config, targets)?;
    Ok(BootImage {
        device: kind,
        path: BootPath::Monitor,
        info,
        args: None,
        aux,
        fallback,
    })
}

fn try_os_boot<B: BootBackend>(
    dir: &VolumeDirectory,
    reader: &mut PebReader<B>,
    config: &LoaderConfig,
    targets: &mut LoadTargets<'_>,
) -> Result<OsAttempt> {
    // Both volumes must resolve before anything is read
    let kernel = match dir.lookup(&config.kernel_volume) {
        Ok(entry) => entry,
        Err(e) => return Ok(OsAttempt::Fallback(e)),
    };
    let args = match dir.lookup(&config.args_volume) {
        Ok(entry) => entry,
        Err(e) => return Ok(OsAttempt::Fallback(e)),
    };
    for (entry, region) in [(kernel, &targets.image), (args, &targets.args)] {
        if entry.size() > region.capacity() {
            return Ok(OsAttempt::Fallback(SplError::DestinationOverflow {
                addr: region.base,
                size: entry.size(),
            }));
        }
    }

    let kernel_len = kernel.size() as usize;
    let args_len = args.size() as usize;

    let mut read = VolumeReader::new(kernel, reader).read_to_end(&mut targets.image.buf[..]);
    if read.is_ok() {
        read = VolumeReader::new(args, reader).read_to_end(&mut targets.args.buf[..]);
    }
    if let Err(e) = read {
        // No partial kernel may survive the fallback
        targets.image.buf[..kernel_len].fill(0);
        targets.args.buf[..args_len].fill(0);
        return Ok(OsAttempt::Fallback(e));
    }

    let kernel_bytes = &targets.image.buf[..kernel_len];
    let header = match parse_header(kernel_bytes)? {
        ImageHeader::Legacy(header) => header,
        ImageHeader::Container(_) => return Err(SplError::UnrecognizedFormat(FdtHeader::MAGIC)),
    };
    let mut src = MemoryImage::new(targets.image.base, kernel_bytes);
    let info = load_legacy(&mut src, &header)?;

    Ok(OsAttempt::Loaded(
        info,
        Payload {
            load_addr: targets.args.base,
            size: args_len as u64,
        },
    ))
}

fn load_monitor<B: BootBackend>(
    kind: BootDeviceKind,
    dir: &VolumeDirectory,
    reader: &mut PebReader<B>,
    config: &LoaderConfig,
    targets: &mut LoadTargets<'_>,
) -> Result<(ImageInfo, Option<Payload>)> {
    let entry = dir.lookup(&config.monitor)?;
    let probe_len = config
        .header_probe_len
        .unwrap_or(entry.usable_leb_size as u64)
        .max(LegacyHeader::SIZE as u64);

    let volume = VolumeReader::new(entry, reader);
    let mut src = VolumeImage::probe(volume, targets.image.reborrow(), probe_len)?;

    enter(kind, BootStage::ParseAndMaybeContainer);
    match parse_header(src.resident())? {
        ImageHeader::Legacy(header) => {
            let info = load_legacy(&mut src, &header)?;
            info!("{}: monitor loaded ({} bytes)", kind, info.size);
            Ok((info, None))
        }
        ImageHeader::Container(_) if !config.load_fit => {
            Err(SplError::UnrecognizedFormat(FdtHeader::MAGIC))
        }
        ImageHeader::Container(header) => {
            info!("{}: Found FIT", kind);
            let image = load_container(
                &mut src,
                &header,
                &mut targets.sub_images,
                config.load_fit_aux,
                MAX_CONTAINER_DEPTH,
            )?;
            Ok((image.info, image.aux))
        }
    }
}

/// Try each device of a boot order until one yields an image
///
/// Kinds without a backend are skipped. If every device fails, the last
/// real error is returned, or `BackendUnsupported` for the first kind if no
/// device was registered at all.
pub fn boot_from_devices(
    registry: &mut BackendRegistry<'_>,
    order: &[BootDeviceKind],
    config: &LoaderConfig,
    targets: &mut LoadTargets<'_>,
) -> Result<BootImage> {
    let mut last = None;

    for &kind in order {
        if !registry.is_enabled(kind) {
            debug!("{}: no backend, skipping", kind);
            last.get_or_insert(SplError::BackendUnsupported(kind));
            continue;
        }
        match resolve(registry, kind, config, targets) {
            Ok(image) => return Ok(image),
            Err(e) => {
                warn!("{}: boot failed: {}", kind, e);
                last = Some(e);
            }
        }
    }

    Err(last.unwrap_or(SplError::NoBootDevice))
}
