//! Helpers related to block devices in sysfs.

use crate::path::{is_partition_of, partition_number};
use crate::{HalError, HalResult};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub fn device_basename(path: &Path) -> HalResult<String> {
    let name = path
        .file_name()
        .ok_or_else(|| HalError::Parse(format!("invalid device path {}", path.display())))?
        .to_string_lossy()
        .to_string();
    Ok(name)
}

/// Reads the block device size from `<sys_block_dev_dir>/size`, in 512-byte sectors.
pub fn block_device_size_sectors(sys_block_dev_dir: &Path) -> HalResult<u64> {
    let size_path = sys_block_dev_dir.join("size");
    let sectors_str = fs::read_to_string(&size_path)?;
    sectors_str
        .trim()
        .parse()
        .map_err(|e| HalError::Parse(format!("{}: {}", size_path.display(), e)))
}

/// Partition nodes of `device` (e.g. `/dev/nbd0`).
///
/// Two sources are merged: `<dev_dir>/<name>p<N>` nodes and `<sys_block_dir>/<name>/<name>p<N>`
/// subentries whose device node also exists. The result is deduplicated and ordered by
/// partition number.
pub fn list_partitions(dev_dir: &Path, sys_block_dir: &Path, device: &str) -> HalResult<Vec<String>> {
    let name = device_basename(Path::new(device))?;
    let mut found: Vec<String> = Vec::new();

    if let Ok(entries) = fs::read_dir(dev_dir) {
        for entry in entries.flatten() {
            let entry_name = entry.file_name().to_string_lossy().to_string();
            if is_partition_of(&name, &entry_name) {
                found.push(dev_dir.join(&entry_name).display().to_string());
            }
        }
    }

    let sys_dev_dir = sys_block_dir.join(&name);
    if sys_dev_dir.exists() {
        for entry in fs::read_dir(&sys_dev_dir)?.flatten() {
            let entry_name = entry.file_name().to_string_lossy().to_string();
            if !is_partition_of(&name, &entry_name) {
                continue;
            }
            let node = dev_dir.join(&entry_name);
            if node.exists() {
                found.push(node.display().to_string());
            }
        }
    }

    let ordered: BTreeSet<(u32, String)> = found
        .into_iter()
        .map(|p| (partition_number(&p).unwrap_or(u32::MAX), p))
        .collect();
    let found: Vec<String> = ordered.into_iter().map(|(_, p)| p).collect();
    log::info!(
        "Found {} partition(s) on {}: {:?}",
        found.len(),
        device,
        found
    );
    Ok(found)
}
