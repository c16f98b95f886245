use std::fs;
use std::path::Path;

/// Block device sector size; raw images must be a whole number of sectors.
pub const SECTOR_SIZE: u64 = 512;

pub(super) fn validate(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => {
            let size = meta.len();
            if size == 0 || size % SECTOR_SIZE != 0 {
                log::debug!(
                    "{} is {} bytes, not a positive multiple of {}",
                    path.display(),
                    size,
                    SECTOR_SIZE
                );
                return false;
            }
            true
        }
        Err(err) => {
            log::warn!("Cannot stat {}: {}", path.display(), err);
            false
        }
    }
}
