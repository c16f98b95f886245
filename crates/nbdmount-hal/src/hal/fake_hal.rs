//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing for CI-safe testing without root privileges, qemu tools or an nbd module.
//! Failures, slot sizes and partition discovery results can be scripted per test.

use super::{CommandOutput, DevicePool, HostOps, MountOps, MountOptions, NbdOps, ProbeOps, ProcessOps};
use crate::path::partition_path;
use crate::{HalError, HalResult};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Command {
        program: String,
        args: Vec<String>,
        timeout_secs: u64,
    },
    NbdConnect {
        device: String,
        image: PathBuf,
        format: String,
        read_only: bool,
    },
    NbdDisconnect {
        device: String,
    },
    RescanPartitions {
        device: String,
    },
    LoadNbdModule {
        max_part: u32,
    },
    ImageInfo {
        image: PathBuf,
    },
    Mount {
        source: String,
        target: PathBuf,
        options: Option<String>,
    },
    Unmount {
        target: PathBuf,
        force: bool,
    },
    MountpointProbe {
        path: PathBuf,
    },
    ReadSlotSize {
        index: u32,
    },
    ReadPartitions {
        device: String,
    },
}

/// How a scripted operation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeFailure {
    Exit { code: i32, stderr: String },
    Timeout { secs: u64 },
    NotFound,
}

impl FakeFailure {
    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        FakeFailure::Exit {
            code,
            stderr: stderr.into(),
        }
    }

    fn into_error(self, program: &str) -> HalError {
        match self {
            FakeFailure::Exit { code, stderr } => HalError::CommandFailed {
                program: program.to_string(),
                code: Some(code),
                stderr,
            },
            FakeFailure::Timeout { secs } => HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: secs,
            },
            FakeFailure::NotFound => HalError::CommandNotFound(program.to_string()),
        }
    }
}

type Matcher = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

#[derive(Clone)]
struct FailureRule {
    matcher: Matcher,
    failure: FakeFailure,
    remaining: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FakeSlot {
    Size(u64),
    Unreadable,
}

/// Shared state for FakeHal operations.
#[derive(Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Paths mounted through this HAL
    mounted_paths: HashSet<PathBuf>,
    /// Paths mounted "by someone else" (visible to the mountpoint probe and mount table)
    external_mounts: HashSet<String>,
    failures: Vec<FailureRule>,
    slots: BTreeMap<u32, FakeSlot>,
    /// Per-device queue of partition lists, one entry per poll; the last entry repeats.
    partitions: HashMap<String, VecDeque<Vec<String>>>,
    stdout: HashMap<String, String>,
    root: bool,
    missing_executables: HashSet<String>,
    existing_paths: HashSet<PathBuf>,
}

/// Fake HAL implementation that records operations without executing them.
///
/// This is designed for testing and CI environments where real system
/// operations would fail or be dangerous. Clones share state, so a test can keep
/// one handle for inspection while the code under test owns another.
#[derive(Clone)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl Default for FakeHal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FakeHal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeHal")
            .field("operations", &state.operations.len())
            .field("mounted_paths", &state.mounted_paths)
            .field("slots", &state.slots)
            .finish()
    }
}

impl FakeHal {
    pub fn new() -> Self {
        let state = FakeHalState {
            root: true,
            ..FakeHalState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeHalState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.lock().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.lock().operations.iter().any(check)
    }

    /// Count recorded operations matching `check`.
    pub fn count_operations(&self, check: impl Fn(&Operation) -> bool) -> usize {
        self.lock().operations.iter().filter(|op| check(op)).count()
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.operations.clear();
        state.mounted_paths.clear();
    }

    /// Make every operation matching `matcher` fail with `failure`.
    pub fn fail_on(
        &self,
        matcher: impl Fn(&Operation) -> bool + Send + Sync + 'static,
        failure: FakeFailure,
    ) {
        self.lock().failures.push(FailureRule {
            matcher: Arc::new(matcher),
            failure,
            remaining: None,
        });
    }

    /// Like [`FakeHal::fail_on`], but only for the first `times` matches.
    pub fn fail_on_times(
        &self,
        matcher: impl Fn(&Operation) -> bool + Send + Sync + 'static,
        failure: FakeFailure,
        times: usize,
    ) {
        self.lock().failures.push(FailureRule {
            matcher: Arc::new(matcher),
            failure,
            remaining: Some(times),
        });
    }

    /// Add slot `index` with the given size in sectors (0 = free).
    pub fn add_slot(&self, index: u32, size: u64) {
        self.lock().slots.insert(index, FakeSlot::Size(size));
    }

    /// Add slot `index` whose size attribute cannot be read.
    pub fn add_unreadable_slot(&self, index: u32) {
        self.lock().slots.insert(index, FakeSlot::Unreadable);
    }

    /// Script the partition lists returned by successive polls of `device`.
    pub fn script_partitions(&self, device: &str, polls: Vec<Vec<String>>) {
        self.lock()
            .partitions
            .insert(device.to_string(), polls.into_iter().collect());
    }

    /// Shorthand: `device` immediately shows partitions `1..=count`.
    pub fn with_partitions(&self, device: &str, count: u32) {
        let parts = (1..=count).map(|n| partition_path(device, n)).collect();
        self.script_partitions(device, vec![parts]);
    }

    /// Canned stdout for commands run through [`ProcessOps`] / [`ProbeOps`] with this program.
    pub fn set_stdout(&self, program: &str, stdout: impl Into<String>) {
        self.lock()
            .stdout
            .insert(program.to_string(), stdout.into());
    }

    /// Mark `path` as mounted outside of this HAL's tracking.
    pub fn add_external_mount(&self, path: &str) {
        self.lock().external_mounts.insert(path.to_string());
    }

    pub fn set_root(&self, root: bool) {
        self.lock().root = root;
    }

    pub fn remove_executable(&self, binary: &str) {
        self.lock().missing_executables.insert(binary.to_string());
    }

    pub fn add_existing_path(&self, path: impl Into<PathBuf>) {
        self.lock().existing_paths.insert(path.into());
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.lock().mounted_paths.contains(target)
    }

    pub fn mounted_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock().mounted_paths.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Record `op` and return the scripted failure for it, if any.
    fn record(&self, op: Operation) -> Option<FakeFailure> {
        let mut state = self.lock();
        let mut failure = None;
        for rule in state.failures.iter_mut() {
            if rule.remaining == Some(0) || !(rule.matcher)(&op) {
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            failure = Some(rule.failure.clone());
            break;
        }
        state.operations.push(op);
        failure
    }

    fn record_checked(&self, op: Operation, program: &str) -> HalResult<()> {
        match self.record(op) {
            Some(failure) => Err(failure.into_error(program)),
            None => Ok(()),
        }
    }

    fn set_slot_size_for(&self, device: &str, size: u64) {
        let mut state = self.lock();
        let index = state
            .slots
            .keys()
            .copied()
            .find(|i| format!("/dev/nbd{}", i) == device);
        if let Some(index) = index {
            state.slots.insert(index, FakeSlot::Size(size));
        }
    }
}

impl ProcessOps for FakeHal {
    fn run(
        &self,
        argv: &[&str],
        timeout: Duration,
        require_success: bool,
    ) -> HalResult<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HalError::Other("empty command line".to_string()))?;
        let op = Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: timeout.as_secs(),
        };
        match self.record(op) {
            Some(FakeFailure::Exit { code, stderr }) if !require_success => Ok(CommandOutput {
                exit_code: code,
                stdout: String::new(),
                stderr,
            }),
            Some(failure) => Err(failure.into_error(program)),
            None => Ok(CommandOutput {
                exit_code: 0,
                stdout: self.lock().stdout.get(*program).cloned().unwrap_or_default(),
                stderr: String::new(),
            }),
        }
    }
}

impl NbdOps for FakeHal {
    fn nbd_connect(
        &self,
        program: &str,
        device: &str,
        image: &Path,
        format_flag: &str,
        read_only: bool,
        _timeout: Duration,
    ) -> HalResult<()> {
        log::info!("FAKE HAL: connect {} -> {}", image.display(), device);
        self.record_checked(
            Operation::NbdConnect {
                device: device.to_string(),
                image: image.to_path_buf(),
                format: format_flag.to_string(),
                read_only,
            },
            program,
        )?;
        self.set_slot_size_for(device, 2048);
        Ok(())
    }

    fn nbd_disconnect(&self, program: &str, device: &str, _timeout: Duration) -> HalResult<()> {
        log::info!("FAKE HAL: disconnect {}", device);
        self.record_checked(
            Operation::NbdDisconnect {
                device: device.to_string(),
            },
            program,
        )?;
        self.set_slot_size_for(device, 0);
        Ok(())
    }

    fn rescan_partitions(&self, program: &str, device: &str, _timeout: Duration) -> HalResult<()> {
        self.record_checked(
            Operation::RescanPartitions {
                device: device.to_string(),
            },
            program,
        )
    }

    fn load_nbd_module(&self, program: &str, max_part: u32, _timeout: Duration) -> HalResult<()> {
        self.record_checked(Operation::LoadNbdModule { max_part }, program)
    }
}

impl ProbeOps for FakeHal {
    fn image_info(&self, program: &str, image: &Path, _timeout: Duration) -> HalResult<String> {
        self.record_checked(
            Operation::ImageInfo {
                image: image.to_path_buf(),
            },
            program,
        )?;
        Ok(self.lock().stdout.get(program).cloned().unwrap_or_default())
    }
}

impl MountOps for FakeHal {
    fn mount(
        &self,
        program: &str,
        source: &str,
        target: &Path,
        options: &MountOptions,
        _timeout: Duration,
    ) -> HalResult<()> {
        log::info!("FAKE HAL: mount {} -> {}", source, target.display());
        self.record_checked(
            Operation::Mount {
                source: source.to_string(),
                target: target.to_path_buf(),
                options: options.joined(),
            },
            program,
        )?;
        self.lock().mounted_paths.insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, program: &str, target: &Path, force: bool, _timeout: Duration) -> HalResult<()> {
        log::info!("FAKE HAL: unmount {}", target.display());
        self.record_checked(
            Operation::Unmount {
                target: target.to_path_buf(),
                force,
            },
            program,
        )?;
        let mut state = self.lock();
        state.mounted_paths.remove(target);
        state
            .external_mounts
            .remove(&*target.to_string_lossy());
        Ok(())
    }

    fn is_mountpoint(&self, _program: &str, path: &Path, _timeout: Duration) -> bool {
        if self
            .record(Operation::MountpointProbe {
                path: path.to_path_buf(),
            })
            .is_some()
        {
            return false;
        }
        let state = self.lock();
        state.mounted_paths.contains(path)
            || state
                .external_mounts
                .contains(&*path.to_string_lossy())
    }

    fn is_device_mounted(&self, path: &str) -> HalResult<bool> {
        let state = self.lock();
        Ok(state.external_mounts.contains(path)
            || state.mounted_paths.contains(Path::new(path)))
    }
}

impl DevicePool for FakeHal {
    fn slot_path(&self, index: u32) -> String {
        format!("/dev/nbd{}", index)
    }

    fn slot_exists(&self, index: u32) -> bool {
        self.lock().slots.contains_key(&index)
    }

    fn slot_size(&self, index: u32) -> HalResult<u64> {
        self.record_checked(Operation::ReadSlotSize { index }, "sysfs")?;
        match self.lock().slots.get(&index) {
            Some(FakeSlot::Size(size)) => Ok(*size),
            Some(FakeSlot::Unreadable) => Err(HalError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot read /sys/block/nbd{}/size", index),
            ))),
            None => Err(HalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("/sys/block/nbd{}/size", index),
            ))),
        }
    }

    fn partitions(&self, device: &str) -> HalResult<Vec<String>> {
        self.record_checked(
            Operation::ReadPartitions {
                device: device.to_string(),
            },
            "sysfs",
        )?;
        let mut state = self.lock();
        let Some(queue) = state.partitions.get_mut(device) else {
            return Ok(Vec::new());
        };
        let parts = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Ok(parts)
    }
}

impl HostOps for FakeHal {
    fn is_root(&self) -> bool {
        self.lock().root
    }

    fn find_executable(&self, binary: &str) -> Option<PathBuf> {
        if self.lock().missing_executables.contains(binary) {
            None
        } else {
            Some(PathBuf::from("/usr/bin").join(binary))
        }
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.lock().existing_paths.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn fake_hal_records_mount() {
        let hal = FakeHal::new();
        let target = Path::new("/mnt/test");

        hal.mount("mount", "/dev/nbd0p1", target, &MountOptions::read_only_noload(), T)
            .unwrap();

        assert_eq!(hal.operation_count(), 1);
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Mount { options: Some(o), .. } if o == "ro,noload"
        )));
        assert!(hal.is_mounted(target));
        assert!(hal.is_mountpoint("mountpoint", target, T));
    }

    #[test]
    fn fake_hal_records_unmount() {
        let hal = FakeHal::new();
        let target = Path::new("/mnt/test");

        hal.mount("mount", "/dev/nbd0p1", target, &MountOptions::new(), T)
            .unwrap();
        hal.unmount("umount", target, false, T).unwrap();

        assert_eq!(hal.operation_count(), 2);
        assert!(hal.has_operation(|op| matches!(op, Operation::Unmount { force: false, .. })));
        assert!(!hal.is_mounted(target));
    }

    #[test]
    fn scripted_failure_applies_to_matching_operation_only() {
        let hal = FakeHal::new();
        hal.fail_on(
            |op| matches!(op, Operation::Mount { source, .. } if source == "/dev/nbd0p2"),
            FakeFailure::exit(32, "wrong fs type"),
        );

        hal.mount("mount", "/dev/nbd0p1", Path::new("/mnt/a"), &MountOptions::new(), T)
            .unwrap();
        let err = hal
            .mount("mount", "/dev/nbd0p2", Path::new("/mnt/b"), &MountOptions::new(), T)
            .unwrap_err();

        assert!(matches!(err, HalError::CommandFailed { code: Some(32), .. }));
        assert!(!hal.is_mounted(Path::new("/mnt/b")));
    }

    #[test]
    fn fail_on_times_expires() {
        let hal = FakeHal::new();
        hal.fail_on_times(
            |op| matches!(op, Operation::RescanPartitions { .. }),
            FakeFailure::Timeout { secs: 10 },
            1,
        );

        assert!(hal.rescan_partitions("partprobe", "/dev/nbd0", T).is_err());
        assert!(hal.rescan_partitions("partprobe", "/dev/nbd0", T).is_ok());
    }

    #[test]
    fn connect_and_disconnect_toggle_slot_size() {
        let hal = FakeHal::new();
        hal.add_slot(0, 0);

        hal.nbd_connect("qemu-nbd", "/dev/nbd0", Path::new("/img.raw"), "raw", true, T)
            .unwrap();
        assert_eq!(hal.slot_size(0).unwrap(), 2048);

        hal.nbd_disconnect("qemu-nbd", "/dev/nbd0", T).unwrap();
        assert_eq!(hal.slot_size(0).unwrap(), 0);
    }

    #[test]
    fn partition_polls_follow_script_and_repeat_last() {
        let hal = FakeHal::new();
        hal.script_partitions(
            "/dev/nbd0",
            vec![vec![], vec!["/dev/nbd0p1".to_string()]],
        );

        assert!(hal.partitions("/dev/nbd0").unwrap().is_empty());
        assert_eq!(hal.partitions("/dev/nbd0").unwrap(), vec!["/dev/nbd0p1"]);
        assert_eq!(hal.partitions("/dev/nbd0").unwrap(), vec!["/dev/nbd0p1"]);
        assert!(hal.partitions("/dev/nbd1").unwrap().is_empty());
    }

    #[test]
    fn run_uses_canned_stdout_and_scripted_exit() {
        let hal = FakeHal::new();
        hal.set_stdout("qemu-img", "file format: qcow2\n");
        hal.fail_on(
            |op| matches!(op, Operation::Command { program, .. } if program == "false"),
            FakeFailure::exit(1, "nope"),
        );

        let out = hal.run(&["qemu-img", "info", "/x"], T, true).unwrap();
        assert_eq!(out.stdout, "file format: qcow2\n");

        let out = hal.run(&["false"], T, false).unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(hal.run(&["false"], T, true).is_err());
    }

    #[test]
    fn fake_hal_can_clear() {
        let hal = FakeHal::new();
        hal.mount("mount", "/dev/nbd0p1", Path::new("/mnt/x"), &MountOptions::new(), T)
            .unwrap();
        assert_eq!(hal.operation_count(), 1);

        hal.clear();

        assert_eq!(hal.operation_count(), 0);
        assert!(hal.mounted_paths().is_empty());
    }

    #[test]
    fn scripted_failures_apply_to_sysfs_reads() {
        let hal = FakeHal::new();
        hal.add_slot(0, 0);
        hal.with_partitions("/dev/nbd0", 1);
        hal.fail_on_times(
            |op| matches!(op, Operation::ReadSlotSize { .. } | Operation::ReadPartitions { .. }),
            FakeFailure::exit(1, "read error"),
            2,
        );

        assert!(hal.slot_size(0).is_err());
        assert!(hal.partitions("/dev/nbd0").is_err());
        assert_eq!(hal.slot_size(0).unwrap(), 0);
        assert_eq!(hal.partitions("/dev/nbd0").unwrap(), vec!["/dev/nbd0p1"]);
    }
}
