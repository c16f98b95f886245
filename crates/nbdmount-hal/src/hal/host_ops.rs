//! Host environment queries used by the prerequisite check.

use std::path::{Path, PathBuf};

pub trait HostOps {
    /// True when running with an effective uid of 0.
    fn is_root(&self) -> bool;

    /// Locate `binary` on `PATH`.
    fn find_executable(&self, binary: &str) -> Option<PathBuf>;

    fn path_exists(&self, path: &Path) -> bool;
}
