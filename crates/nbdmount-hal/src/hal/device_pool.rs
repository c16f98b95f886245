//! Access to the kernel's pool of NBD device slots.

use crate::HalResult;

/// The fixed, process-external set of `/dev/nbdN` slots and their sysfs attributes.
///
/// Nothing here reserves a slot: a slot that reads as free may be claimed by
/// another process before the caller connects to it.
pub trait DevicePool {
    /// Device node path for slot `index` (e.g. `/dev/nbd3`).
    fn slot_path(&self, index: u32) -> String;

    /// Whether the device node for slot `index` exists.
    fn slot_exists(&self, index: u32) -> bool;

    /// Kernel-reported size of slot `index` in sectors. Zero means nothing is attached.
    fn slot_size(&self, index: u32) -> HalResult<u64>;

    /// Partition device paths currently materialized for `device`, ordered by partition number.
    fn partitions(&self, device: &str) -> HalResult<Vec<String>>;
}
