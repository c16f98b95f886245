//! Mount operations trait.

use super::ProcessOps;
use crate::HalResult;
use std::path::Path;
use std::time::Duration;

/// Trait for mounting and unmounting filesystems through the `mount` family of tools.
pub trait MountOps: ProcessOps {
    /// Mount a device to a target path.
    ///
    /// # Arguments
    /// * `program` - mount executable (usually `mount`)
    /// * `source` - Device path (e.g., `/dev/nbd0p1`)
    /// * `target` - Mount point path
    /// * `options` - Mount options, passed as a single `-o` argument when non-empty
    fn mount(
        &self,
        program: &str,
        source: &str,
        target: &Path,
        options: &MountOptions,
        timeout: Duration,
    ) -> HalResult<()> {
        let target = target.display().to_string();
        let joined = options.joined();
        let mut argv = vec![program];
        if let Some(opts) = joined.as_deref() {
            argv.push("-o");
            argv.push(opts);
        }
        argv.push(source);
        argv.push(&target);
        self.run(&argv, timeout, true).map(|_| ())
    }

    /// Unmount a filesystem, optionally forced (`-f`).
    fn unmount(&self, program: &str, target: &Path, force: bool, timeout: Duration) -> HalResult<()> {
        let target = target.display().to_string();
        let mut argv = vec![program];
        if force {
            argv.push("-f");
        }
        argv.push(&target);
        self.run(&argv, timeout, true).map(|_| ())
    }

    /// `<program> -q <path>` as a boolean probe. Any failure to run the probe reads as "not mounted".
    fn is_mountpoint(&self, program: &str, path: &Path, timeout: Duration) -> bool {
        let path = path.display().to_string();
        match self.run(&[program, "-q", &path], timeout, false) {
            Ok(output) => output.success(),
            Err(err) => {
                log::debug!("mountpoint probe for {} failed: {}", path, err);
                false
            }
        }
    }

    /// Check the system mount table for an entry whose source or target is exactly `path`.
    fn is_device_mounted(&self, path: &str) -> HalResult<bool>;
}

/// Mount options and flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Individual options (e.g. `["ro", "noload"]`).
    pub options: Vec<String>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// `ro,noload`: read-only without journal replay, so a dirty image is never modified.
    pub fn read_only_noload() -> Self {
        Self::with_options(["ro", "noload"])
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Comma-joined form for `mount -o`, or `None` when there are no options.
    pub fn joined(&self) -> Option<String> {
        if self.options.is_empty() {
            None
        } else {
            Some(self.options.join(","))
        }
    }
}
