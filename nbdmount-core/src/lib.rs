//! nbdmount core library.
//!
//! Detects disk image formats, attaches images to `/dev/nbdN` slots, discovers the
//! resulting partitions and mounts them, tearing everything down again on every
//! exit path. The binary in `nbdmount` is a thin CLI over [`manager::NbdMountTool`].

pub mod allocator;
pub mod cancel;
pub mod config;
pub mod device;
pub mod format;
pub mod logging;
pub mod manager;
pub mod mounter;
pub mod preflight;
pub mod retry;

pub use config::NbdConfig;
pub use device::{ConnectedDevice, DeviceState, NbdDevice};
pub use format::{ImageDescriptor, ImageFormat};
pub use manager::{ImageInfo, NbdMountTool};
pub use mounter::{MountPoint, MountSession, MountState};
pub use nbdmount_error::{ErrorKind, HalError, NbdError, NbdResult};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
