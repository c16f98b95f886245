//! Image format identification.
//!
//! Formats form a closed set probed in priority order (lower first). Each format has a
//! cheap structural detector and a fuller validator; RAW accepts whatever no
//! higher-priority format claims.

mod qcow2;
mod raw;

use crate::config::NbdConfig;
use nbdmount_error::{NbdError, NbdResult};
use nbdmount_hal::ProbeOps;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use qcow2::QCOW2_MAGIC;
pub use raw::SECTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Qcow2,
    Raw,
}

impl ImageFormat {
    /// Every supported format, in detection order.
    pub const ALL: [ImageFormat; 2] = [ImageFormat::Qcow2, ImageFormat::Raw];

    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Qcow2 => "qcow2",
            ImageFormat::Raw => "raw",
        }
    }

    pub fn priority(self) -> u32 {
        match self {
            ImageFormat::Qcow2 => 10,
            ImageFormat::Raw => 50,
        }
    }

    /// Value passed to `qemu-nbd --format`.
    pub fn qemu_flag(self) -> &'static str {
        self.name()
    }

    /// Cheap structural check on the file header.
    pub fn detect(self, path: &Path) -> io::Result<bool> {
        match self {
            ImageFormat::Qcow2 => qcow2::has_magic(path),
            ImageFormat::Raw => qcow2::has_magic(path).map(|qcow| !qcow),
        }
    }

    /// Full check; may shell out to the image inspection tool. Probe failures read as `false`.
    pub fn validate<H: ProbeOps + ?Sized>(self, hal: &H, config: &NbdConfig, path: &Path) -> bool {
        match self {
            ImageFormat::Qcow2 => qcow2::validate(hal, config, path),
            ImageFormat::Raw => raw::validate(path),
        }
    }

    fn names() -> String {
        Self::ALL
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated image: canonical path plus detected format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub path: PathBuf,
    pub format: ImageFormat,
}

impl ImageDescriptor {
    pub fn priority(&self) -> u32 {
        self.format.priority()
    }
}

/// Identify the format of the image at `path`.
///
/// With a `hint`, only the first format whose name contains it (case-insensitive) is
/// validated and there is no fallback to auto-detection. Without one, formats are
/// probed in priority order and per-format probe failures are skipped.
pub fn detect<H: ProbeOps + ?Sized>(
    hal: &H,
    config: &NbdConfig,
    path: &Path,
    hint: Option<&str>,
) -> NbdResult<ImageDescriptor> {
    let path = resolve_image(path)?;

    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        let wanted = hint.to_lowercase();
        let format = ImageFormat::ALL
            .into_iter()
            .find(|f| f.name().contains(&wanted))
            .ok_or_else(|| {
                NbdError::Format(format!(
                    "Unknown format '{}' (supported: {})",
                    hint,
                    ImageFormat::names()
                ))
            })?;
        if !format.validate(hal, config, &path) {
            return Err(NbdError::Format(format!(
                "{} is not a valid {} image",
                path.display(),
                format
            )));
        }
        log::info!("Using format {} for {}", format, path.display());
        return Ok(ImageDescriptor { path, format });
    }

    for format in ImageFormat::ALL {
        match format.detect(&path) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                log::warn!("{} detector failed on {}: {}", format, path.display(), err);
                continue;
            }
        }
        if format.validate(hal, config, &path) {
            log::info!("Detected format {} for {}", format, path.display());
            return Ok(ImageDescriptor { path, format });
        }
        log::debug!("{} header matched but validation failed", format);
    }

    Err(NbdError::Format(format!(
        "Could not detect format of {} (supported: {})",
        path.display(),
        ImageFormat::names()
    )))
}

/// Canonicalize and check that `path` is a readable regular file.
fn resolve_image(path: &Path) -> NbdResult<PathBuf> {
    let canonical = match fs::canonicalize(path) {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(NbdError::ImageNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !canonical.is_file() {
        return Err(NbdError::Format(format!(
            "{} is not a regular file",
            canonical.display()
        )));
    }
    match fs::File::open(&canonical) {
        Ok(_) => Ok(canonical),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(NbdError::Permission(
            format!("cannot read image {}", canonical.display()),
        )),
        Err(e) => Err(e.into()),
    }
}
