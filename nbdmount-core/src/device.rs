//! Connect/disconnect lifecycle of a single NBD slot.

use crate::allocator::find_free_device;
use crate::config::NbdConfig;
use crate::format::ImageDescriptor;
use crate::retry::{Sleeper, ThreadSleeper};
use nbdmount_error::{HalError, NbdError, NbdResult};
use nbdmount_hal::{DevicePool, NbdHal, NbdOps};
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owns at most one connected slot at a time.
///
/// `Disconnected` is both the initial and the terminal state; [`NbdDevice::disconnect`]
/// always returns there, whatever the disconnect command does.
pub struct NbdDevice {
    hal: Arc<dyn NbdHal>,
    config: Arc<NbdConfig>,
    sleeper: Arc<dyn Sleeper>,
    state: DeviceState,
    path: Option<String>,
    partitions: Vec<String>,
}

impl NbdDevice {
    pub fn new(hal: Arc<dyn NbdHal>, config: Arc<NbdConfig>) -> Self {
        Self {
            hal,
            config,
            sleeper: Arc::new(ThreadSleeper),
            state: DeviceState::Disconnected,
            path: None,
            partitions: Vec::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == DeviceState::Connected
    }

    /// Device node of the connected slot (`/dev/nbdN`).
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Partitions discovered after the last connect; empty means whole-disk.
    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    /// Attach `image` to a free slot and discover its partitions.
    ///
    /// Partition discovery never fails the connect: an image without a partition
    /// table ends up connected with no partitions.
    pub fn connect(&mut self, image: &ImageDescriptor, read_only: bool) -> NbdResult<()> {
        if self.state != DeviceState::Disconnected {
            return Err(NbdError::AlreadyConnected(
                self.path.clone().unwrap_or_else(|| "nbd".to_string()),
            ));
        }
        self.state = DeviceState::Connecting;

        let device = match find_free_device(&*self.hal, self.config.max_slots) {
            Ok(device) => device,
            Err(err) => {
                self.state = DeviceState::Disconnected;
                return Err(err);
            }
        };

        log::info!(
            "Connecting {} to {} (format={}, read_only={})",
            image.path.display(),
            device,
            image.format,
            read_only
        );
        if let Err(err) = self.hal.nbd_connect(
            &self.config.tools.qemu_nbd,
            &device,
            &image.path,
            image.format.qemu_flag(),
            read_only,
            self.config.timeouts.connect(),
        ) {
            if matches!(err, HalError::CommandTimeout { .. }) {
                // The slot may be half attached; release it before giving up.
                log::warn!("Connect to {} timed out, disconnecting defensively", device);
                self.run_disconnect(&device);
            }
            self.state = DeviceState::Disconnected;
            return Err(NbdError::device(
                device,
                format!("failed to connect {}: {}", image.path.display(), err),
            ));
        }

        self.state = DeviceState::Connected;
        self.path = Some(device.clone());
        self.partitions = self.discover_partitions(&device);
        log::info!(
            "Connected {} with {} partition(s)",
            device,
            self.partitions.len()
        );
        Ok(())
    }

    /// Like [`NbdDevice::connect`], but the returned guard disconnects when dropped.
    pub fn connect_scoped(
        &mut self,
        image: &ImageDescriptor,
        read_only: bool,
    ) -> NbdResult<ConnectedDevice<'_>> {
        self.connect(image, read_only)?;
        Ok(ConnectedDevice { device: self })
    }

    /// Release the slot. Safe to call in any state; failures are logged, never returned.
    pub fn disconnect(&mut self) {
        if let Some(device) = self.path.take() {
            log::info!("Disconnecting {}", device);
            self.run_disconnect(&device);
        }
        self.state = DeviceState::Disconnected;
        self.partitions.clear();
    }

    fn run_disconnect(&self, device: &str) {
        if let Err(err) = self.hal.nbd_disconnect(
            &self.config.tools.qemu_nbd,
            device,
            self.config.timeouts.disconnect(),
        ) {
            log::warn!("Failed to disconnect {}: {}", device, err);
        }
    }

    fn discover_partitions(&self, device: &str) -> Vec<String> {
        if let Err(err) = self.hal.rescan_partitions(
            &self.config.tools.partprobe,
            device,
            self.config.timeouts.rescan(),
        ) {
            log::warn!("Partition rescan of {} failed: {}", device, err);
            return Vec::new();
        }

        let policy = self.config.discovery_policy();
        let partitions = policy.poll_until(
            &*self.sleeper,
            |attempt| match self.hal.partitions(device) {
                Ok(parts) => parts,
                Err(err) => {
                    log::warn!(
                        "Reading partitions of {} failed (attempt {}): {}",
                        device,
                        attempt,
                        err
                    );
                    Vec::new()
                }
            },
            |parts| !parts.is_empty(),
        );
        if partitions.is_empty() {
            log::info!("No partitions found on {}, using whole device", device);
        }
        partitions
    }
}

impl Drop for NbdDevice {
    fn drop(&mut self) {
        if self.path.is_some() {
            self.disconnect();
        }
    }
}

/// A connected [`NbdDevice`]; disconnects on drop, including during unwinding.
pub struct ConnectedDevice<'a> {
    device: &'a mut NbdDevice,
}

impl ConnectedDevice<'_> {
    /// Device node path. Always set while the guard is alive.
    pub fn path(&self) -> &str {
        self.device.path().unwrap_or_default()
    }
}

impl Deref for ConnectedDevice<'_> {
    type Target = NbdDevice;

    fn deref(&self) -> &NbdDevice {
        &*self.device
    }
}

impl Drop for ConnectedDevice<'_> {
    fn drop(&mut self) {
        self.device.disconnect();
    }
}
