//! Parsing helpers for `/proc/mounts` (and similar fstab-style mount tables).

use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
}

pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some(MountEntry {
                source: unescape_mount_path(source),
                target: unescape_mount_path(target),
            })
        })
        .collect()
}

/// True iff some entry's source or target column is exactly `path`.
pub fn is_device_mounted_from(path: &str, entries: &[MountEntry]) -> bool {
    entries
        .iter()
        .any(|entry| entry.source == path || entry.target == path)
}

pub fn is_device_mounted_in(mounts_file: &Path, path: &str) -> std::io::Result<bool> {
    let content = std::fs::read_to_string(mounts_file)?;
    Ok(is_device_mounted_from(path, &parse_mounts(&content)))
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "/dev/sda3 / ext4 rw,relatime 0 0\n\
                          /dev/nbd0p1 /mnt/nbd-disk/part1 ext4 ro,noload 0 0\n\
                          tmpfs /mnt/data\\040disk tmpfs rw 0 0\n";

    #[test]
    fn parse_mounts_extracts_source_and_target() {
        let entries = parse_mounts(SAMPLE);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].source, "/dev/nbd0p1");
        assert_eq!(entries[1].target, "/mnt/nbd-disk/part1");
    }

    #[test]
    fn matches_source_or_target_exactly() {
        let entries = parse_mounts(SAMPLE);
        assert!(is_device_mounted_from("/dev/nbd0p1", &entries));
        assert!(is_device_mounted_from("/mnt/nbd-disk/part1", &entries));
        assert!(!is_device_mounted_from("/dev/nbd0", &entries));
        assert!(!is_device_mounted_from("/mnt/nbd-disk", &entries));
    }

    #[test]
    fn mount_paths_are_unescaped() {
        let entries = parse_mounts(SAMPLE);
        assert!(is_device_mounted_from("/mnt/data disk", &entries));
    }

    #[test]
    fn reads_table_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mounts");
        std::fs::write(&file, SAMPLE).unwrap();
        assert!(is_device_mounted_in(&file, "/").unwrap());
        assert!(!is_device_mounted_in(&file, "/boot").unwrap());
    }
}
