//! Ctrl+C handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static HANDLER_SET: OnceLock<()> = OnceLock::new();

/// Route Ctrl+C into the core cancel flag. Safe to call more than once.
pub fn install_ctrlc_handler() -> anyhow::Result<()> {
    if HANDLER_SET.get().is_some() {
        return Ok(());
    }

    let flag = Arc::new(AtomicBool::new(false));
    nbdmount_core::cancel::register(flag.clone());
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        log::info!("Cancellation requested (Ctrl+C).");
    })?;

    let _ = HANDLER_SET.set(());
    Ok(())
}
