use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "nbdmount",
    author,
    version,
    about = "Mount QCOW2/RAW disk image partitions through NBD",
    after_help = "Examples:\n  nbdmount disk.qcow2 list\n  nbdmount disk.qcow2 mount --hold\n  nbdmount disk.img mount --format raw --mount-dir /mnt/disk --rw"
)]
pub struct Cli {
    /// Disk image to operate on
    pub image: PathBuf,

    /// What to do with the image
    #[arg(value_enum)]
    pub action: Action,

    /// Base directory for mount points (default: /mnt/nbd-<image name>)
    #[arg(short = 'd', long)]
    pub mount_dir: Option<PathBuf>,

    /// Force the image format instead of detecting it (qcow2, raw)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Connect and mount read-write
    #[arg(long)]
    pub rw: bool,

    /// Keep partitions mounted until Ctrl+C
    #[arg(long)]
    pub hold: bool,

    /// Print results as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// TOML file overriding tool names, timeouts and paths
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Mount every partition of the image
    Mount,
    /// List the partitions of the image
    List,
    /// Show image format and size
    Info,
    /// Check privileges, required tools and the nbd module
    Check,
}
