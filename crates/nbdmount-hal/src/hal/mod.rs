//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for system operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod device_pool;
pub mod fake_hal;
pub mod host_ops;
pub mod linux_hal;
pub mod mount_ops;
pub mod nbd_ops;
pub mod probe_ops;
pub mod process_ops;

pub use device_pool::DevicePool;
pub use fake_hal::{FakeFailure, FakeHal, Operation};
pub use host_ops::HostOps;
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use nbd_ops::NbdOps;
pub use probe_ops::ProbeOps;
pub use process_ops::{CommandOutput, ProcessOps};

/// Complete HAL combining all system operation traits.
pub trait NbdHal: NbdOps + MountOps + ProbeOps + DevicePool + HostOps + Send + Sync {}

/// Automatically implement NbdHal for any type implementing all required traits.
impl<T> NbdHal for T where T: NbdOps + MountOps + ProbeOps + DevicePool + HostOps + Send + Sync {}
