//! Process execution helpers.
//!
//! External commands are considered "world-touching" and must go through the HAL so we can
//! test workflows without spawning real processes.

use crate::HalResult;
use std::time::Duration;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Process execution trait (external command runner).
///
/// No retries happen here; callers decide whether a failure is worth repeating.
pub trait ProcessOps {
    /// Run `argv[0]` with the remaining arguments, bounded by `timeout`.
    ///
    /// Errors:
    /// * [`crate::HalError::CommandNotFound`] when the executable does not exist
    /// * [`crate::HalError::CommandTimeout`] when the bound is exceeded
    /// * [`crate::HalError::CommandFailed`] when `require_success` and the exit code is non-zero
    fn run(
        &self,
        argv: &[&str],
        timeout: Duration,
        require_success: bool,
    ) -> HalResult<CommandOutput>;
}
