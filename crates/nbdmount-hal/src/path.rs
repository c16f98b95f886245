//! Naming helpers for NBD device and partition nodes.

/// Partition path helper for block devices. nbd/nvme/mmcblk nodes take a `p` separator.
pub fn partition_path(disk: &str, num: u32) -> String {
    if disk.contains("nbd") || disk.contains("nvme") || disk.contains("mmcblk") {
        format!("{}p{}", disk, num)
    } else {
        format!("{}{}", disk, num)
    }
}

/// Trailing partition number of a `...p<N>` node (`/dev/nbd0p3` -> `3`).
pub fn partition_number(path: &str) -> Option<u32> {
    let digits_start = path.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits_start == path.len() {
        return None;
    }
    let (head, digits) = path.split_at(digits_start);
    if !head.ends_with('p') {
        return None;
    }
    digits.parse().ok()
}

/// Whether `name` is `<base>p<digits>`, i.e. a partition of `base`.
pub fn is_partition_of(base: &str, name: &str) -> bool {
    name.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('p'))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Filesystem-safe name for a device path (`/dev/mapper/x` -> `mapper_x`).
pub fn sanitize_device_name(path: &str) -> String {
    let trimmed = path.strip_prefix("/dev/").unwrap_or(path);
    trimmed
        .trim_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
