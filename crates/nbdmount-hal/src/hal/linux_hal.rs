//! Linux HAL implementation using real processes, sysfs and `/proc/mounts`.

use super::{CommandOutput, DevicePool, HostOps, MountOps, NbdOps, ProbeOps, ProcessOps};
use crate::procfs::mounts::is_device_mounted_in;
use crate::sysfs::block::{block_device_size_sectors, list_partitions};
use crate::{HalError, HalResult};
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone)]
pub struct LinuxHal {
    dev_dir: PathBuf,
    sys_block_dir: PathBuf,
    proc_mounts: PathBuf,
}

impl Default for LinuxHal {
    fn default() -> Self {
        Self {
            dev_dir: PathBuf::from("/dev"),
            sys_block_dir: PathBuf::from("/sys/block"),
            proc_mounts: PathBuf::from("/proc/mounts"),
        }
    }
}

impl LinuxHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use alternate roots for device nodes, sysfs block entries and the mount table.
    pub fn with_roots(
        dev_dir: impl Into<PathBuf>,
        sys_block_dir: impl Into<PathBuf>,
        proc_mounts: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dev_dir: dev_dir.into(),
            sys_block_dir: sys_block_dir.into(),
            proc_mounts: proc_mounts.into(),
        }
    }
}

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        log::error!("Command not found: {} (is it installed?)", program);
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            log::error!("{} timed out after {}s", program, timeout.as_secs());
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

impl ProcessOps for LinuxHal {
    fn run(
        &self,
        argv: &[&str],
        timeout: Duration,
        require_success: bool,
    ) -> HalResult<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HalError::Other("empty command line".to_string()))?;
        log::debug!("Executing: {}", argv.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = output_with_timeout(program, &mut cmd, timeout)?;

        if !output.stdout.is_empty() {
            log::debug!("STDOUT:\n{}", output.stdout);
        }
        if !output.stderr.is_empty() {
            log::debug!("STDERR:\n{}", output.stderr);
        }

        if require_success && !output.success() {
            let stderr = output.stderr.trim().to_string();
            log::error!(
                "Command failed (exit {}): {}: {}",
                output.exit_code,
                argv.join(" "),
                stderr
            );
            return Err(HalError::CommandFailed {
                program: program.to_string(),
                code: Some(output.exit_code),
                stderr,
            });
        }
        Ok(output)
    }
}

impl NbdOps for LinuxHal {}

impl ProbeOps for LinuxHal {}

impl MountOps for LinuxHal {
    fn is_device_mounted(&self, path: &str) -> HalResult<bool> {
        Ok(is_device_mounted_in(&self.proc_mounts, path)?)
    }
}

impl DevicePool for LinuxHal {
    fn slot_path(&self, index: u32) -> String {
        self.dev_dir.join(format!("nbd{}", index)).display().to_string()
    }

    fn slot_exists(&self, index: u32) -> bool {
        self.dev_dir.join(format!("nbd{}", index)).exists()
    }

    fn slot_size(&self, index: u32) -> HalResult<u64> {
        block_device_size_sectors(&self.sys_block_dir.join(format!("nbd{}", index)))
    }

    fn partitions(&self, device: &str) -> HalResult<Vec<String>> {
        list_partitions(&self.dev_dir, &self.sys_block_dir, device)
    }
}

impl HostOps for LinuxHal {
    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn find_executable(&self, binary: &str) -> Option<PathBuf> {
        let path_env = std::env::var("PATH").unwrap_or_default();
        find_executable_in_path(binary, &path_env)
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub(crate) fn find_executable_in_path(binary: &str, path_env: &str) -> Option<PathBuf> {
    for dir in path_env.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(binary);
        if let Ok(metadata) = fs::metadata(&candidate) {
            if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}
