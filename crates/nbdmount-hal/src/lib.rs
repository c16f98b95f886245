//! nbdmount hardware abstraction layer.
//!
//! Everything that touches the outside world (external programs, `/sys`, `/dev`,
//! the mount table) goes through the traits in [`hal`], so the orchestration in
//! `nbdmount-core` can be exercised against [`FakeHal`] without root or a kernel
//! NBD module.

pub mod hal;
pub mod path;
pub mod procfs;
pub mod sysfs;

pub use hal::{
    CommandOutput, DevicePool, FakeFailure, FakeHal, HostOps, LinuxHal, MountOps, MountOptions,
    NbdHal, NbdOps, Operation, ProbeOps, ProcessOps,
};
pub use nbdmount_error::{HalError, HalResult};
