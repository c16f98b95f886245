//! Runtime configuration: external tool names, kernel paths, timeouts and discovery tuning.
//!
//! Every field has a built-in default; a TOML file only needs the keys it overrides.

use crate::retry::RetryPolicy;
use nbdmount_error::{NbdError, NbdResult};
use nbdmount_hal::MountOptions;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names (or absolute paths) of the external programs nbdmount drives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub qemu_nbd: String,
    pub qemu_img: String,
    pub partprobe: String,
    pub modprobe: String,
    pub mount: String,
    pub umount: String,
    pub mountpoint: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            qemu_nbd: "qemu-nbd".to_string(),
            qemu_img: "qemu-img".to_string(),
            partprobe: "partprobe".to_string(),
            modprobe: "modprobe".to_string(),
            mount: "mount".to_string(),
            umount: "umount".to_string(),
            mountpoint: "mountpoint".to_string(),
        }
    }
}

impl Tools {
    /// Programs that must be on `PATH` before any image is touched.
    pub fn required(&self) -> Vec<&str> {
        vec![
            self.qemu_nbd.as_str(),
            self.qemu_img.as_str(),
            self.partprobe.as_str(),
            self.mount.as_str(),
            self.umount.as_str(),
            self.mountpoint.as_str(),
        ]
    }
}

/// Per-command bounds, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub connect: u64,
    pub disconnect: u64,
    pub rescan: u64,
    pub mount: u64,
    pub unmount: u64,
    pub probe: u64,
    pub inspect: u64,
    pub modprobe: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: 30,
            disconnect: 10,
            rescan: 10,
            mount: 15,
            unmount: 10,
            probe: 5,
            inspect: 10,
            modprobe: 5,
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_secs(self.disconnect)
    }

    pub fn rescan(&self) -> Duration {
        Duration::from_secs(self.rescan)
    }

    pub fn mount(&self) -> Duration {
        Duration::from_secs(self.mount)
    }

    pub fn unmount(&self) -> Duration {
        Duration::from_secs(self.unmount)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe)
    }

    pub fn inspect(&self) -> Duration {
        Duration::from_secs(self.inspect)
    }

    pub fn modprobe(&self) -> Duration {
        Duration::from_secs(self.modprobe)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NbdConfig {
    pub tools: Tools,
    pub timeouts: Timeouts,
    /// Number of `/dev/nbdN` slots scanned when looking for a free device.
    pub max_slots: u32,
    /// `max_part` passed to `modprobe nbd` when the module has to be loaded.
    pub nbd_max_part: u32,
    pub dev_dir: PathBuf,
    pub sys_block_dir: PathBuf,
    pub proc_mounts: PathBuf,
    /// Present iff the nbd kernel module is loaded.
    pub nbd_module_marker: PathBuf,
    pub discovery_attempts: u32,
    pub discovery_delay_ms: u64,
    pub default_mount_options: Vec<String>,
    /// Parent of the per-image default mount directory.
    pub mount_root: PathBuf,
}

impl Default for NbdConfig {
    fn default() -> Self {
        Self {
            tools: Tools::default(),
            timeouts: Timeouts::default(),
            max_slots: 32,
            nbd_max_part: 16,
            dev_dir: PathBuf::from("/dev"),
            sys_block_dir: PathBuf::from("/sys/block"),
            proc_mounts: PathBuf::from("/proc/mounts"),
            nbd_module_marker: PathBuf::from("/sys/module/nbd"),
            discovery_attempts: 4,
            discovery_delay_ms: 500,
            default_mount_options: vec!["ro".to_string(), "noload".to_string()],
            mount_root: PathBuf::from("/mnt"),
        }
    }
}

impl NbdConfig {
    pub fn from_toml_str(contents: &str) -> NbdResult<Self> {
        toml::from_str(contents).map_err(|e| NbdError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> NbdResult<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| NbdError::Config(format!("unable to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&contents)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` when given, otherwise use the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> NbdResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn discovery_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.discovery_attempts,
            Duration::from_millis(self.discovery_delay_ms),
        )
    }

    pub fn default_mount_options(&self) -> MountOptions {
        MountOptions::with_options(self.default_mount_options.iter().cloned())
    }
}
