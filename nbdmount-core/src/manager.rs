//! High-level use cases: mount an image, list its partitions, describe it.

use crate::cancel::check_cancel;
use crate::config::NbdConfig;
use crate::device::NbdDevice;
use crate::format::{self, ImageDescriptor, ImageFormat};
use crate::mounter::MountSession;
use crate::retry::{Sleeper, ThreadSleeper};
use nbdmount_error::NbdResult;
use nbdmount_hal::{MountOptions, NbdHal};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Summary printed by the `info` action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub size_gb: f64,
    pub size_bytes: u64,
    pub read_only: bool,
}

pub struct NbdMountTool {
    hal: Arc<dyn NbdHal>,
    config: Arc<NbdConfig>,
    sleeper: Arc<dyn Sleeper>,
    image: ImageDescriptor,
    read_only: bool,
}

impl NbdMountTool {
    /// Detect the format of `image` and prepare a tool for it.
    pub fn new(
        hal: Arc<dyn NbdHal>,
        config: NbdConfig,
        image: &Path,
        format_hint: Option<&str>,
        read_only: bool,
    ) -> NbdResult<Self> {
        let image = format::detect(&*hal, &config, image, format_hint)?;
        log::info!(
            "Image format: {} ({})",
            image.format,
            image.path.display()
        );
        Ok(Self {
            hal,
            config: Arc::new(config),
            sleeper: Arc::new(ThreadSleeper),
            image,
            read_only,
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn image(&self) -> &ImageDescriptor {
        &self.image
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// `<mount_root>/nbd-<image stem>`, lowercased with spaces replaced by `_`.
    pub fn default_mount_dir(&self) -> PathBuf {
        let stem = self
            .image
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().replace(' ', "_").to_lowercase())
            .unwrap_or_else(|| "image".to_string());
        self.config.mount_root.join(format!("nbd-{}", stem))
    }

    /// Options used when the caller does not pass any: the configured read-only set,
    /// or none at all for a read-write session.
    pub fn mount_options(&self) -> MountOptions {
        if self.read_only {
            self.config.default_mount_options()
        } else {
            MountOptions::new()
        }
    }

    /// Connect, mount every partition (or the whole device when there are none), then
    /// unmount and disconnect. Returns what was mounted during the session.
    pub fn mount_image(
        &self,
        mount_dir: Option<&Path>,
        options: Option<MountOptions>,
    ) -> NbdResult<Vec<(String, PathBuf)>> {
        self.mount_image_with(mount_dir, options, |mounted| Ok(mounted.to_vec()))
    }

    /// Like [`NbdMountTool::mount_image`], running `body` while the mounts are live.
    ///
    /// Mounts are released before the device, on success, on error and on interrupt.
    pub fn mount_image_with<T>(
        &self,
        mount_dir: Option<&Path>,
        options: Option<MountOptions>,
        body: impl FnOnce(&[(String, PathBuf)]) -> NbdResult<T>,
    ) -> NbdResult<T> {
        let base_dir = mount_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_mount_dir());
        let options = options.unwrap_or_else(|| self.mount_options());

        check_cancel()?;
        let mut device = self.device();
        let connected = device.connect_scoped(&self.image, self.read_only)?;
        check_cancel()?;

        let mut session = MountSession::new(self.hal.clone(), self.config.clone());
        let mounted = if connected.partitions().is_empty() {
            log::warn!("No partitions detected, mounting the whole device");
            let point =
                session.mount_one(connected.path(), &base_dir.join("whole_disk"), &options)?;
            vec![(point.source, point.target)]
        } else {
            session.mount_all(connected.partitions(), &base_dir, &options)
        };
        check_cancel()?;

        body(&mounted)
    }

    /// Connect read-only, report the discovered partitions and disconnect again.
    pub fn list_partitions(&self) -> NbdResult<Vec<String>> {
        check_cancel()?;
        let mut device = self.device();
        let connected = device.connect_scoped(&self.image, true)?;
        check_cancel()?;
        Ok(connected.partitions().to_vec())
    }

    pub fn image_info(&self) -> NbdResult<ImageInfo> {
        let size_bytes = fs::metadata(&self.image.path)?.len();
        let size_gb = (size_bytes as f64 / BYTES_PER_GIB * 100.0).round() / 100.0;
        Ok(ImageInfo {
            path: self.image.path.clone(),
            format: self.image.format,
            size_gb,
            size_bytes,
            read_only: self.read_only,
        })
    }

    fn device(&self) -> NbdDevice {
        NbdDevice::new(self.hal.clone(), self.config.clone()).with_sleeper(self.sleeper.clone())
    }
}
