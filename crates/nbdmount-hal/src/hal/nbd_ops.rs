//! NBD device operations (qemu-nbd, partprobe, modprobe).

use super::ProcessOps;
use crate::HalResult;
use std::path::Path;
use std::time::Duration;

pub trait NbdOps: ProcessOps {
    /// Attach `image` to `device` (`<program> --connect <device> --format <flag> [--read-only] <image>`).
    fn nbd_connect(
        &self,
        program: &str,
        device: &str,
        image: &Path,
        format_flag: &str,
        read_only: bool,
        timeout: Duration,
    ) -> HalResult<()> {
        let image = image.display().to_string();
        let mut argv = vec![program, "--connect", device, "--format", format_flag];
        if read_only {
            argv.push("--read-only");
        }
        argv.push(&image);
        self.run(&argv, timeout, true).map(|_| ())
    }

    /// Detach whatever is attached to `device`.
    fn nbd_disconnect(&self, program: &str, device: &str, timeout: Duration) -> HalResult<()> {
        self.run(&[program, "--disconnect", device], timeout, true)
            .map(|_| ())
    }

    /// Ask the kernel to re-read the partition table of `device`.
    fn rescan_partitions(&self, program: &str, device: &str, timeout: Duration) -> HalResult<()> {
        self.run(&[program, device], timeout, true).map(|_| ())
    }

    /// Load the nbd kernel module with room for `max_part` partitions per device.
    fn load_nbd_module(&self, program: &str, max_part: u32, timeout: Duration) -> HalResult<()> {
        let max_part = format!("max_part={}", max_part);
        self.run(&[program, "nbd", &max_part], timeout, true)
            .map(|_| ())
    }
}
