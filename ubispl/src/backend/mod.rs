//! Boot backends
//!
//! A backend is a raw flash device reached through a block-read capability
//! plus the UBI geometry configured for it. The loader never sees controller
//! mechanics, only `read_blocks` and the `select`/`deselect` lifecycle hooks.
//!
//! Any `gpt_disk_io::BlockIo` device can serve as a backend through
//! [`BlockIoBackend`]; boards with their own controller code implement
//! [`BootBackend`] directly.

pub mod peb;
pub mod registry;

pub use peb::PebReader;
pub use registry::{BackendRegistry, SelectedBackend};

use crate::error::{Result, SplError};
use crate::types::{BootDeviceKind, FlashGeometry};
use gpt_disk_io::BlockIo;
use gpt_disk_types::Lba;
use log::warn;

/// Object-safe flash backend
pub trait BootBackend {
    /// Device kind this backend serves
    fn kind(&self) -> BootDeviceKind;

    /// UBI layout on this device
    fn geometry(&self) -> FlashGeometry;

    /// Device block size in bytes
    fn block_size(&self) -> u32;

    /// Read whole device blocks starting at `lba`
    ///
    /// `dst.len()` is always a multiple of [`block_size`](Self::block_size).
    fn read_blocks(&mut self, lba: Lba, dst: &mut [u8]) -> Result<()>;

    /// Bring the controller up before the first read
    fn select(&mut self) {}

    /// Release the controller after the last read
    fn deselect(&mut self) {}
}

impl<T: BootBackend + ?Sized> BootBackend for &mut T {
    fn kind(&self) -> BootDeviceKind {
        (**self).kind()
    }

    fn geometry(&self) -> FlashGeometry {
        (**self).geometry()
    }

    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn read_blocks(&mut self, lba: Lba, dst: &mut [u8]) -> Result<()> {
        (**self).read_blocks(lba, dst)
    }

    fn select(&mut self) {
        (**self).select()
    }

    fn deselect(&mut self) {
        (**self).deselect()
    }
}

/// Lifecycle hook run against the wrapped device
pub type BackendHook<B> = fn(&mut B);

/// [`BootBackend`] over any `BlockIo` device
pub struct BlockIoBackend<B: BlockIo> {
    kind: BootDeviceKind,
    io: B,
    geometry: FlashGeometry,
    on_select: Option<BackendHook<B>>,
    on_deselect: Option<BackendHook<B>>,
}

impl<B: BlockIo> BlockIoBackend<B> {
    /// Wrap a device with no lifecycle hooks
    pub fn new(kind: BootDeviceKind, io: B, geometry: FlashGeometry) -> Self {
        Self {
            kind,
            io,
            geometry,
            on_select: None,
            on_deselect: None,
        }
    }

    /// Attach controller bring-up and release hooks
    pub fn with_hooks(mut self, select: BackendHook<B>, deselect: BackendHook<B>) -> Self {
        self.on_select = Some(select);
        self.on_deselect = Some(deselect);
        self
    }

    /// Borrow the wrapped device
    pub fn io(&self) -> &B {
        &self.io
    }

    /// Unwrap the device
    pub fn into_inner(self) -> B {
        self.io
    }
}

impl<B: BlockIo> BootBackend for BlockIoBackend<B> {
    fn kind(&self) -> BootDeviceKind {
        self.kind
    }

    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn block_size(&self) -> u32 {
        self.io.block_size().to_u32()
    }

    fn read_blocks(&mut self, lba: Lba, dst: &mut [u8]) -> Result<()> {
        self.io.read_blocks(lba, dst).map_err(|e| {
            warn!("{}: read at LBA {} failed: {}", self.kind, lba.0, e);
            SplError::BackendReadError { lba: lba.0 }
        })
    }

    fn select(&mut self) {
        if let Some(hook) = self.on_select {
            hook(&mut self.io);
        }
    }

    fn deselect(&mut self) {
        if let Some(hook) = self.on_deselect {
            hook(&mut self.io);
        }
    }
}
