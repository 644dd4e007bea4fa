//! Backend registry and selection
//!
//! Boards register one backend per device kind they carry. Selecting a kind
//! that was never registered fails fast with `BackendUnsupported` before any
//! bring-up or read happens.

use super::BootBackend;
use crate::error::{Result, SplError};
use crate::types::{BootDeviceKind, FlashGeometry};
use alloc::boxed::Box;
use alloc::vec::Vec;
use log::debug;

struct Entry<'a> {
    kind: BootDeviceKind,
    priority: u8,
    backend: Box<dyn BootBackend + 'a>,
}

/// Mapping from boot device kind to backend
#[derive(Default)]
pub struct BackendRegistry<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> BackendRegistry<'a> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a backend for its kind
    ///
    /// Lower `priority` numbers win. A backend registered for a kind that is
    /// already taken replaces the existing one only if its priority is lower
    /// or equal.
    pub fn register(&mut self, priority: u8, backend: impl BootBackend + 'a) {
        let kind = backend.kind();
        match self.entries.iter_mut().find(|e| e.kind == kind) {
            Some(entry) if priority <= entry.priority => {
                debug!("{}: replacing backend (priority {})", kind, priority);
                entry.priority = priority;
                entry.backend = Box::new(backend);
            }
            Some(entry) => {
                debug!(
                    "{}: keeping backend with priority {} over {}",
                    kind, entry.priority, priority
                );
            }
            None => self.entries.push(Entry {
                kind,
                priority,
                backend: Box::new(backend),
            }),
        }
    }

    /// Whether `kind` has a backend
    pub fn is_enabled(&self, kind: BootDeviceKind) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }

    /// Registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = BootDeviceKind> + '_ {
        self.entries.iter().map(|e| e.kind)
    }

    /// Select the backend for `kind` and bring it up
    ///
    /// The returned guard deselects the backend exactly once when dropped.
    pub fn select(&mut self, kind: BootDeviceKind) -> Result<SelectedBackend<'_, 'a>> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.kind == kind)
            .ok_or(SplError::BackendUnsupported(kind))?;
        entry.backend.geometry().validate()?;
        Ok(SelectedBackend::new(kind, entry.backend.as_mut()))
    }
}

/// A selected backend; deselected on drop
pub struct SelectedBackend<'r, 'a> {
    kind: BootDeviceKind,
    backend: &'r mut (dyn BootBackend + 'a),
}

impl<'r, 'a> SelectedBackend<'r, 'a> {
    fn new(kind: BootDeviceKind, backend: &'r mut (dyn BootBackend + 'a)) -> Self {
        backend.select();
        debug!("{}: selected", kind);
        Self { kind, backend }
    }

    /// Selected kind
    pub fn kind(&self) -> BootDeviceKind {
        self.kind
    }

    /// UBI layout of the selected device
    pub fn geometry(&self) -> FlashGeometry {
        self.backend.geometry()
    }

    /// Borrow the backend for reading
    pub fn backend(&mut self) -> &mut (dyn BootBackend + 'a) {
        &mut *self.backend
    }
}

impl Drop for SelectedBackend<'_, '_> {
    fn drop(&mut self) {
        self.backend.deselect();
        debug!("{}: deselected", self.kind);
    }
}
