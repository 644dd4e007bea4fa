//! Loader configuration

use crate::types::VolumeSelector;

/// Default volume id of the OS kernel
pub const DEFAULT_KERNEL_VOLUME: u32 = 3;

/// Default volume id of the OS argument blob
pub const DEFAULT_ARGS_VOLUME: u32 = 4;

/// Default volume id of the monitor
pub const DEFAULT_MONITOR_VOLUME: u32 = 0;

/// Policy knobs for one resolution attempt
///
/// `Default` follows the crate features: `os-boot` enables the OS tier,
/// `fastmap` the fast index and `fit` container loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Try the kernel and argument volumes before the monitor
    pub os_boot: bool,

    /// Kernel volume
    pub kernel_volume: VolumeSelector,

    /// Argument blob volume
    pub args_volume: VolumeSelector,

    /// Monitor volume, by id or by name
    pub monitor: VolumeSelector,

    /// Use the fastmap when one validates
    pub fastmap: bool,

    /// Resolve FIT containers found in the monitor volume
    pub load_fit: bool,

    /// Also load the container's auxiliary payload
    pub load_fit_aux: bool,

    /// Bytes read before the monitor header is parsed, `None` for one LEB
    pub header_probe_len: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            os_boot: cfg!(feature = "os-boot"),
            kernel_volume: VolumeSelector::Id(DEFAULT_KERNEL_VOLUME),
            args_volume: VolumeSelector::Id(DEFAULT_ARGS_VOLUME),
            monitor: VolumeSelector::Id(DEFAULT_MONITOR_VOLUME),
            fastmap: cfg!(feature = "fastmap"),
            load_fit: cfg!(feature = "fit"),
            load_fit_aux: true,
            header_probe_len: None,
        }
    }
}

impl LoaderConfig {
    /// Look the monitor up by exact name instead of id
    ///
    /// Returns `None` if the name does not fit a volume table record.
    pub fn with_monitor_name(mut self, name: &str) -> Option<Self> {
        self.monitor = VolumeSelector::name(name)?;
        Some(self)
    }
}
