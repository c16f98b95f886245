//! Image probing operations (qemu-img).

use super::ProcessOps;
use crate::HalResult;
use std::path::Path;
use std::time::Duration;

/// Probing operations trait.
pub trait ProbeOps: ProcessOps {
    /// Return the stdout of `<program> info <image>`.
    fn image_info(&self, program: &str, image: &Path, timeout: Duration) -> HalResult<String> {
        let image = image.display().to_string();
        let output = self.run(&[program, "info", &image], timeout, true)?;
        Ok(output.stdout)
    }
}
