//! Mount bookkeeping for the partitions of one connected device.

use crate::config::NbdConfig;
use nbdmount_error::{NbdError, NbdResult};
use nbdmount_hal::path::{partition_number, sanitize_device_name};
use nbdmount_hal::{MountOps, MountOptions, NbdHal};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub source: String,
    pub target: PathBuf,
    pub state: MountState,
}

/// Directory name used under the base dir for `partition` (`/dev/nbd0p2` -> `part2`).
pub fn partition_dir_name(partition: &str) -> String {
    match partition_number(partition) {
        Some(n) => format!("part{}", n),
        None => sanitize_device_name(partition),
    }
}

/// Insertion-ordered set of live mounts.
///
/// Every tracked entry is mounted; dropping the session unmounts whatever is still
/// tracked, last mounted first.
pub struct MountSession {
    hal: Arc<dyn NbdHal>,
    config: Arc<NbdConfig>,
    mounts: Vec<MountPoint>,
}

impl MountSession {
    pub fn new(hal: Arc<dyn NbdHal>, config: Arc<NbdConfig>) -> Self {
        Self {
            hal,
            config,
            mounts: Vec::new(),
        }
    }

    pub fn mounts(&self) -> &[MountPoint] {
        &self.mounts
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// `(partition, target)` pairs in mount order.
    pub fn mapping(&self) -> Vec<(String, PathBuf)> {
        self.mounts
            .iter()
            .map(|m| (m.source.clone(), m.target.clone()))
            .collect()
    }

    /// Mount `partition` on `target`, creating the directory if needed.
    ///
    /// Mounting an already tracked partition again is a no-op.
    pub fn mount_one(
        &mut self,
        partition: &str,
        target: &Path,
        options: &MountOptions,
    ) -> NbdResult<MountPoint> {
        if let Some(existing) = self
            .mounts
            .iter()
            .find(|m| m.source == partition && m.state == MountState::Mounted)
        {
            log::debug!("{} already mounted on {}", partition, existing.target.display());
            return Ok(existing.clone());
        }

        fs::create_dir_all(target).map_err(|e| {
            NbdError::mount(
                partition,
                format!("cannot create mount point {}: {}", target.display(), e),
            )
        })?;
        let target = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());

        if let Some(other) = self.mounts.iter().find(|m| m.target == target) {
            return Err(NbdError::mount(
                partition,
                format!("{} is already the mount point of {}", target.display(), other.source),
            ));
        }

        log::info!("Mounting {} on {}", partition, target.display());
        self.hal
            .mount(
                &self.config.tools.mount,
                partition,
                &target,
                options,
                self.config.timeouts.mount(),
            )
            .map_err(|e| {
                NbdError::mount(
                    partition,
                    format!("mount on {} failed: {}", target.display(), e),
                )
            })?;

        let point = MountPoint {
            source: partition.to_string(),
            target,
            state: MountState::Mounted,
        };
        self.mounts.push(point.clone());
        Ok(point)
    }

    /// Mount each partition under `base_dir/partN`. Failures are logged and skipped;
    /// only the partitions that mounted are returned.
    pub fn mount_all(
        &mut self,
        partitions: &[String],
        base_dir: &Path,
        options: &MountOptions,
    ) -> Vec<(String, PathBuf)> {
        let mut mounted = Vec::new();
        for partition in partitions {
            let target = base_dir.join(partition_dir_name(partition));
            match self.mount_one(partition, &target, options) {
                Ok(point) => mounted.push((point.source, point.target)),
                Err(err) => log::warn!("Skipping {}: {}", partition, err),
            }
        }
        mounted
    }

    /// Unmount the tracked entry for `partition`. Unknown partitions are a no-op.
    pub fn unmount_one(&mut self, partition: &str, force: bool) -> NbdResult<()> {
        let Some(index) = self.mounts.iter().position(|m| m.source == partition) else {
            return Ok(());
        };
        unmount_point(&*self.hal, &self.config, &mut self.mounts[index], force)?;
        self.mounts.remove(index);
        Ok(())
    }

    /// Unmount everything, last mounted first. Entries that fail stay tracked and the
    /// loop moves on. Returns how many entries remain.
    pub fn unmount_all(&mut self, force: bool) -> usize {
        for index in (0..self.mounts.len()).rev() {
            match unmount_point(&*self.hal, &self.config, &mut self.mounts[index], force) {
                Ok(()) => {
                    self.mounts.remove(index);
                }
                Err(err) => log::warn!("{}", err),
            }
        }
        if !self.mounts.is_empty() {
            log::error!("{} mount(s) could not be unmounted", self.mounts.len());
        }
        self.mounts.len()
    }
}

impl Drop for MountSession {
    fn drop(&mut self) {
        if !self.mounts.is_empty() {
            self.unmount_all(false);
        }
    }
}

/// Unmount one mount point.
///
/// A point that is neither tracked as mounted nor reported as a mount point by the
/// system is left alone.
pub fn unmount_point<H: MountOps + ?Sized>(
    hal: &H,
    config: &NbdConfig,
    point: &mut MountPoint,
    force: bool,
) -> NbdResult<()> {
    if point.state != MountState::Mounted
        && !hal.is_mountpoint(&config.tools.mountpoint, &point.target, config.timeouts.probe())
    {
        return Ok(());
    }
    log::info!("Unmounting {}", point.target.display());
    hal.unmount(
        &config.tools.umount,
        &point.target,
        force,
        config.timeouts.unmount(),
    )
    .map_err(|e| {
        NbdError::mount(
            point.source.as_str(),
            format!("unmount of {} failed: {}", point.target.display(), e),
        )
    })?;
    point.state = MountState::Unmounted;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbdmount_hal::{FakeFailure, FakeHal, Operation};
    use tempfile::TempDir;

    fn session(hal: &FakeHal) -> MountSession {
        MountSession::new(Arc::new(hal.clone()), Arc::new(NbdConfig::default()))
    }

    fn parts(n: u32) -> Vec<String> {
        (1..=n).map(|i| format!("/dev/nbd0p{}", i)).collect()
    }

    fn unmount_order(hal: &FakeHal) -> Vec<PathBuf> {
        hal.operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::Unmount { target, .. } => Some(target),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn dir_name_from_partition_number() {
        assert_eq!(partition_dir_name("/dev/nbd0p3"), "part3");
        assert_eq!(partition_dir_name("/dev/nbd0"), "nbd0");
    }

    #[test]
    fn mount_one_creates_target_and_is_idempotent() {
        let hal = FakeHal::new();
        let base = TempDir::new().unwrap();
        let target = base.path().join("a/b/part1");
        let mut s = session(&hal);

        let point = s
            .mount_one("/dev/nbd0p1", &target, &MountOptions::read_only_noload())
            .unwrap();
        assert!(target.is_dir());
        assert_eq!(point.state, MountState::Mounted);
        s.mount_one("/dev/nbd0p1", &target, &MountOptions::read_only_noload())
            .unwrap();

        assert_eq!(
            hal.count_operations(|op| matches!(
                op,
                Operation::Mount { options: Some(o), .. } if o == "ro,noload"
            )),
            1
        );
        assert_eq!(s.mounts().len(), 1);
    }

    #[test]
    fn same_target_for_another_partition_is_refused() {
        let hal = FakeHal::new();
        let base = TempDir::new().unwrap();
        let mut s = session(&hal);
        let opts = MountOptions::new();

        s.mount_one("/dev/nbd0p1", base.path(), &opts).unwrap();
        let err = s.mount_one("/dev/nbd0p2", base.path(), &opts).unwrap_err();
        assert!(matches!(err, NbdError::Mount { ref device, .. } if device == "/dev/nbd0p2"));
    }

    #[test]
    fn mount_failure_propagates_and_is_not_tracked() {
        let hal = FakeHal::new();
        hal.fail_on(
            |op| matches!(op, Operation::Mount { .. }),
            FakeFailure::exit(32, "wrong fs type"),
        );
        let base = TempDir::new().unwrap();
        let mut s = session(&hal);

        let err = s
            .mount_one("/dev/nbd0p1", &base.path().join("p1"), &MountOptions::new())
            .unwrap_err();
        assert!(err.to_string().contains("wrong fs type"));
        assert!(s.is_empty());
    }

    #[test]
    fn mount_all_skips_failed_partition() {
        let hal = FakeHal::new();
        hal.fail_on(
            |op| matches!(op, Operation::Mount { source, .. } if source == "/dev/nbd0p2"),
            FakeFailure::exit(32, "bad superblock"),
        );
        let base = TempDir::new().unwrap();
        let mut s = session(&hal);

        let mounted = s.mount_all(&parts(3), base.path(), &MountOptions::read_only_noload());
        let sources: Vec<&str> = mounted.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(sources, ["/dev/nbd0p1", "/dev/nbd0p3"]);
        assert!(mounted[1].1.ends_with("part3"));
        assert_eq!(s.mapping(), mounted);
    }

    #[test]
    fn unmount_all_runs_in_reverse_order() {
        let hal = FakeHal::new();
        let base = TempDir::new().unwrap();
        let mut s = session(&hal);
        let mounted = s.mount_all(&parts(3), base.path(), &MountOptions::new());

        assert_eq!(s.unmount_all(false), 0);
        let expected: Vec<PathBuf> = mounted.iter().rev().map(|(_, t)| t.clone()).collect();
        assert_eq!(unmount_order(&hal), expected);
        assert!(hal.mounted_paths().is_empty());
    }

    #[test]
    fn unmount_all_keeps_failed_entry_and_continues() {
        let hal = FakeHal::new();
        let base = TempDir::new().unwrap();
        let mut s = session(&hal);
        s.mount_all(&parts(3), base.path(), &MountOptions::new());
        let stuck = base.path().join("part2");
        let stuck_canon = std::fs::canonicalize(&stuck).unwrap();
        hal.fail_on(
            move |op| matches!(op, Operation::Unmount { target, .. } if *target == stuck_canon),
            FakeFailure::exit(32, "target is busy"),
        );

        assert_eq!(s.unmount_all(false), 1);
        assert_eq!(s.mounts()[0].source, "/dev/nbd0p2");
        assert_eq!(unmount_order(&hal).len(), 3);
    }

    #[test]
    fn unmount_one_handles_untracked_and_tracked() {
        let hal = FakeHal::new();
        let base = TempDir::new().unwrap();
        let mut s = session(&hal);

        s.unmount_one("/dev/nbd0p9", false).unwrap();
        assert_eq!(hal.operation_count(), 0);

        s.mount_one("/dev/nbd0p1", &base.path().join("p1"), &MountOptions::new())
            .unwrap();
        s.unmount_one("/dev/nbd0p1", true).unwrap();
        assert!(s.is_empty());
        assert!(hal.has_operation(|op| matches!(op, Operation::Unmount { force: true, .. })));
    }

    #[test]
    fn unmount_point_probes_external_mounts() {
        let hal = FakeHal::new();
        let cfg = NbdConfig::default();
        let mut point = MountPoint {
            source: "/dev/nbd0p1".to_string(),
            target: PathBuf::from("/mnt/elsewhere"),
            state: MountState::Unmounted,
        };

        unmount_point(&hal, &cfg, &mut point, false).unwrap();
        assert!(!hal.has_operation(|op| matches!(op, Operation::Unmount { .. })));

        hal.add_external_mount("/mnt/elsewhere");
        unmount_point(&hal, &cfg, &mut point, false).unwrap();
        assert!(hal.has_operation(|op| matches!(op, Operation::Unmount { .. })));
    }

    #[test]
    fn dropping_session_unmounts_leftovers() {
        let hal = FakeHal::new();
        let base = TempDir::new().unwrap();
        {
            let mut s = session(&hal);
            s.mount_all(&parts(2), base.path(), &MountOptions::new());
        }
        assert_eq!(unmount_order(&hal).len(), 2);
        assert!(hal.mounted_paths().is_empty());
    }
}
