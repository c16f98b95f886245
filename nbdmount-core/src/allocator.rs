//! Free NBD slot lookup.

use nbdmount_error::{NbdError, NbdResult};
use nbdmount_hal::DevicePool;

/// Return the lowest-numbered slot in `[0, max_slots)` whose node exists and whose
/// kernel size reads exactly zero.
///
/// Slots whose size cannot be read are skipped, not fatal. The slot is not reserved:
/// another process may claim it before the caller connects, in which case the connect
/// itself fails.
pub fn find_free_device<P: DevicePool + ?Sized>(pool: &P, max_slots: u32) -> NbdResult<String> {
    for index in 0..max_slots {
        if !pool.slot_exists(index) {
            continue;
        }
        let path = pool.slot_path(index);
        match pool.slot_size(index) {
            Ok(0) => {
                log::info!("Found free NBD device: {}", path);
                return Ok(path);
            }
            Ok(size) => log::debug!("{} in use ({} sectors)", path, size),
            Err(err) => log::warn!("Could not check {}: {}", path, err),
        }
    }
    Err(NbdError::DeviceNotFound { max_slots })
}
