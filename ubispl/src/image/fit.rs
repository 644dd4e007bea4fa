//! FIT container resolution
//!
//! A FIT is an FDT with two top-level nodes:
//!
//! ```text
//! / {
//!     images {
//!         uboot { data-offset; data-size; load; entry; os; hash-1 { algo; value; }; };
//!         fdt-1 { data; };
//!     };
//!     configurations {
//!         default = "conf-1";
//!         conf-1 { firmware = "uboot"; fdt = "fdt-1"; };
//!     };
//! };
//! ```
//!
//! The selected configuration names the main payload (`firmware`, or
//! `kernel`) and optionally an auxiliary payload (`fdt`). Sub-image data is
//! either inline in a `data` property or stored after the blob and located
//! by `data-offset`/`data-position` plus `data-size`.
//!
//! Loading is two-phase: every placement and hash is checked first, then
//! payloads are copied. A failure leaves every load region untouched.

use super::fdt::{parse_tree, FdtHeader, Node};
use super::ImageSource;
use crate::error::{ChecksumKind, Result, SplError};
use crate::region::{find_region, LoadRegion};
use crate::types::{ImageInfo, ImageKind, ImageOs, Payload, MAX_CONTAINER_DEPTH};
use crate::utils::checksum::crc32;
use log::debug;

/// Payloads resolved from a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerImage {
    /// Main payload, copied to its load address
    pub info: ImageInfo,
    /// Auxiliary payload, if requested and present
    pub aux: Option<Payload>,
}

fn malformed(what: &'static str) -> SplError {
    SplError::MalformedContainer(what)
}

/// Byte range of sub-image data within the container
#[derive(Debug, Clone, Copy)]
struct Span {
    offset: u64,
    len: u64,
}

impl Span {
    fn end(&self) -> Result<u64> {
        self.offset
            .checked_add(self.len)
            .ok_or(malformed("sub-image data out of range"))
    }
}

#[derive(Debug, Clone, Copy)]
struct SubImage {
    span: Span,
    load: Option<u64>,
    entry: Option<u64>,
    os: ImageOs,
    crc: Option<u32>,
}

impl SubImage {
    fn describe(images: &Node<'_>, name: &str, role: &'static str, header: &FdtHeader) -> Result<Self> {
        let node = images.child(name).ok_or(SplError::MissingImage(role))?;

        if let Some(comp) = node.prop_str("compression") {
            if comp != "none" {
                return Err(SplError::UnsupportedCompression);
            }
        }

        let span = match node.prop("data") {
            Some(data) => Span {
                offset: data.offset as u64,
                len: data.value.len() as u64,
            },
            None => {
                let len = node
                    .prop_u32("data-size")
                    .ok_or(malformed("external data without data-size"))?;
                let offset = if let Some(off) = node.prop_u32("data-offset") {
                    header.data_base() + off as u64
                } else if let Some(pos) = node.prop_u32("data-position") {
                    pos as u64
                } else {
                    return Err(malformed("sub-image has no data"));
                };
                Span {
                    offset,
                    len: len as u64,
                }
            }
        };

        let mut crc = None;
        for hash in node.children.iter().filter(|c| c.name.starts_with("hash")) {
            if hash.prop_str("algo") == Some("crc32") {
                crc = Some(hash.prop_u32("value").ok_or(malformed("bad crc32 value"))?);
            }
        }

        Ok(Self {
            span,
            load: node.prop_addr("load")?,
            entry: node.prop_addr("entry")?,
            os: node
                .prop_str("os")
                .map(ImageOs::from_fit_name)
                .unwrap_or(ImageOs::Other(0)),
            crc,
        })
    }

    fn data<'s>(&self, resident: &'s [u8]) -> Result<&'s [u8]> {
        resident
            .get(self.span.offset as usize..self.span.end()? as usize)
            .ok_or(malformed("sub-image data out of range"))
    }

    fn verify(&self, resident: &[u8]) -> Result<()> {
        if let Some(expected) = self.crc {
            if crc32(self.data(resident)?) != expected {
                return Err(SplError::ChecksumMismatch(ChecksumKind::SubImage));
            }
        }
        Ok(())
    }
}

/// Pick the configuration and describe its payloads
fn plan(
    resident: &[u8],
    header: &FdtHeader,
    load_aux: bool,
) -> Result<(SubImage, Option<SubImage>)> {
    let root = parse_tree(resident, header)?;
    let images = root.child("images").ok_or(malformed("no images node"))?;
    let configs = root
        .child("configurations")
        .ok_or(malformed("no configurations node"))?;

    let config = match configs.prop_str("default") {
        Some(name) => configs
            .child(name)
            .ok_or(malformed("default configuration missing"))?,
        None => configs
            .children
            .first()
            .ok_or(malformed("no configuration"))?,
    };
    debug!("FIT: configuration {}", config.name);

    let main_name = config
        .prop_str("firmware")
        .or_else(|| config.prop_str("kernel"))
        .ok_or(SplError::MissingImage("firmware"))?;
    let main = SubImage::describe(images, main_name, "firmware", header)?;

    let aux = match config.prop_str("fdt") {
        Some(name) if load_aux => Some(SubImage::describe(images, name, "fdt", header)?),
        _ => None,
    };

    Ok((main, aux))
}

fn overlaps(a_addr: u64, a_len: u64, b_addr: u64, b_len: u64) -> bool {
    a_addr < b_addr.saturating_add(b_len) && b_addr < a_addr.saturating_add(a_len)
}

/// Resolve a container and copy its payloads into `regions`
///
/// `depth` is how many container levels the caller allows; it must be
/// between 1 and [`MAX_CONTAINER_DEPTH`].
pub fn load_container<S: ImageSource + ?Sized>(
    src: &mut S,
    header: &FdtHeader,
    regions: &mut [LoadRegion<'_>],
    load_aux: bool,
    depth: u8,
) -> Result<ContainerImage> {
    if depth == 0 || depth > MAX_CONTAINER_DEPTH {
        return Err(SplError::ContainerDepthExceeded(MAX_CONTAINER_DEPTH));
    }

    src.extend(header.totalsize as u64)?;
    let (main, aux) = plan(src.resident(), header, load_aux)?;

    let main_load = main
        .load
        .ok_or(malformed("firmware has no load address"))?;
    let main_entry = main.entry.unwrap_or(main_load);
    let main_end = main_load
        .checked_add(main.span.len)
        .ok_or(SplError::DestinationOverflow {
            addr: main_load,
            size: main.span.len,
        })?;
    let aux = match aux {
        Some(a) => {
            let addr = match a.load {
                Some(addr) => addr,
                // Right after the firmware, 8-byte aligned
                None => main_end
                    .checked_add(7)
                    .map(|end| end & !7)
                    .ok_or(SplError::DestinationOverflow {
                        addr: main_end,
                        size: a.span.len,
                    })?,
            };
            Some((addr, a))
        }
        None => None,
    };

    // External data lives past the blob
    let mut data_end = main.span.end()?;
    if let Some((_, a)) = &aux {
        data_end = data_end.max(a.span.end()?);
    }
    src.extend(data_end)?;

    // Validate everything before the first copy
    let main_idx = find_region(regions, main_load, main.span.len)?;
    let aux_idx = match &aux {
        Some((addr, a)) => {
            if overlaps(main_load, main.span.len, *addr, a.span.len) {
                return Err(malformed("sub-images overlap"));
            }
            Some(find_region(regions, *addr, a.span.len)?)
        }
        None => None,
    };
    main.verify(src.resident())?;
    if let Some((_, a)) = &aux {
        a.verify(src.resident())?;
    }

    copy_into(&mut regions[main_idx], main_load, main.data(src.resident())?)?;
    debug!("FIT: firmware {} bytes at {:#x}", main.span.len, main_load);

    let aux_payload = match (aux, aux_idx) {
        (Some((addr, a)), Some(idx)) => {
            copy_into(&mut regions[idx], addr, a.data(src.resident())?)?;
            debug!("FIT: fdt {} bytes at {:#x}", a.span.len, addr);
            Some(Payload {
                load_addr: addr,
                size: a.span.len,
            })
        }
        _ => None,
    };

    Ok(ContainerImage {
        info: ImageInfo {
            kind: ImageKind::Container,
            os: main.os,
            load_addr: main_load,
            entry_point: main_entry,
            size: main.span.len,
            data_addr: main_load,
        },
        aux: aux_payload,
    })
}

fn copy_into(region: &mut LoadRegion<'_>, addr: u64, data: &[u8]) -> Result<()> {
    let size = data.len() as u64;
    region
        .slice_mut(addr, size)
        .ok_or(SplError::DestinationOverflow { addr, size })?
        .copy_from_slice(data);
    Ok(())
}
