//! Process-wide interrupt flag, checked between lifecycle steps.
//!
//! The binary registers the flag its Ctrl+C handler sets; library code only polls it.
//! Returning [`NbdError::Interrupted`] unwinds the mount and device guards normally.

use nbdmount_error::{NbdError, NbdResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

static INTERRUPT: OnceLock<Mutex<Option<Arc<AtomicBool>>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Arc<AtomicBool>>> {
    INTERRUPT.get_or_init(|| Mutex::new(None))
}

/// Make `flag` the interrupt source for this process, replacing any previous one.
pub fn register(flag: Arc<AtomicBool>) {
    let mut current = slot().lock().unwrap_or_else(|e| e.into_inner());
    *current = Some(flag);
}

pub fn unregister() {
    let mut current = slot().lock().unwrap_or_else(|e| e.into_inner());
    *current = None;
}

pub fn is_interrupted() -> bool {
    let current = slot().lock().unwrap_or_else(|e| e.into_inner());
    current
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::SeqCst))
}

pub fn check_cancel() -> NbdResult<()> {
    if is_interrupted() {
        log::warn!("Interrupted, releasing mounts and device");
        return Err(NbdError::Interrupted);
    }
    Ok(())
}
