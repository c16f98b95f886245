//! Environment checks run before any image is touched.

use crate::config::NbdConfig;
use nbdmount_error::{NbdError, NbdResult};
use nbdmount_hal::{HostOps, NbdOps};

/// Fail on missing privileges or tools. A missing nbd module is only a warning: loading
/// it is attempted, and a failed load is left for the connect to report.
pub fn check<H: HostOps + NbdOps + ?Sized>(hal: &H, config: &NbdConfig) -> NbdResult<()> {
    log::info!("Checking prerequisites");

    if !hal.is_root() {
        return Err(NbdError::Permission(
            "nbdmount must be run as root".to_string(),
        ));
    }

    let missing = missing_commands(hal, config);
    if !missing.is_empty() {
        log::error!("Install them with e.g.: sudo apt install qemu-utils parted util-linux");
        return Err(NbdError::MissingCommands(missing));
    }

    ensure_nbd_module(hal, config);
    log::info!("All prerequisites satisfied");
    Ok(())
}

/// Required tools that cannot be found on `PATH`.
pub fn missing_commands<H: HostOps + ?Sized>(hal: &H, config: &NbdConfig) -> Vec<String> {
    config
        .tools
        .required()
        .into_iter()
        .filter(|cmd| hal.find_executable(cmd).is_none())
        .map(str::to_string)
        .collect()
}

fn ensure_nbd_module<H: HostOps + NbdOps + ?Sized>(hal: &H, config: &NbdConfig) {
    if hal.path_exists(&config.nbd_module_marker) {
        return;
    }
    log::warn!(
        "NBD kernel module not loaded, trying: {} nbd max_part={}",
        config.tools.modprobe,
        config.nbd_max_part
    );
    if let Err(err) = hal.load_nbd_module(
        &config.tools.modprobe,
        config.nbd_max_part,
        config.timeouts.modprobe(),
    ) {
        log::warn!("Failed to load the nbd module: {}", err);
    }
}
