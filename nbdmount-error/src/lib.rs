use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type NbdResult<T> = Result<T, NbdError>;

/// Failures at the boundary with external programs and kernel attributes.
#[derive(Error, Debug)]
pub enum HalError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification used by the CLI to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Device,
    Image,
    Mount,
    Permission,
    Command,
    Setup,
    Interrupted,
    Io,
}

#[derive(Error, Debug)]
pub enum NbdError {
    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("[{device}] {message}")]
    Device { device: String, message: String },

    #[error("[{0}] device already connected")]
    AlreadyConnected(String),

    #[error(
        "No free NBD device (checked nbd0-nbd{}). Is the nbd module loaded (modprobe nbd max_part=16), or are all devices in use?",
        .max_slots.saturating_sub(1)
    )]
    DeviceNotFound { max_slots: u32 },

    #[error("Image format error: {0}")]
    Format(String),

    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("[{device}] {message}")]
    Mount { device: String, message: String },

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Missing required commands: {}", .0.join(", "))]
    MissingCommands(Vec<String>),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation interrupted by user")]
    Interrupted,
}

impl NbdError {
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        NbdError::Device {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn mount(device: impl Into<String>, message: impl Into<String>) -> Self {
        NbdError::Mount {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NbdError::Hal(HalError::Io(_)) | NbdError::Io(_) => ErrorKind::Io,
            NbdError::Hal(_) => ErrorKind::Command,
            NbdError::Device { .. }
            | NbdError::AlreadyConnected(_)
            | NbdError::DeviceNotFound { .. } => ErrorKind::Device,
            NbdError::Format(_) | NbdError::ImageNotFound(_) => ErrorKind::Image,
            NbdError::Mount { .. } => ErrorKind::Mount,
            NbdError::Permission(_) => ErrorKind::Permission,
            NbdError::MissingCommands(_) | NbdError::Config(_) => ErrorKind::Setup,
            NbdError::Interrupted => ErrorKind::Interrupted,
        }
    }
}
