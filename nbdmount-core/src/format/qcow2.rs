use crate::config::NbdConfig;
use nbdmount_hal::ProbeOps;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// QCOW2 header magic: `QFI\xfb`.
pub const QCOW2_MAGIC: [u8; 4] = [0x51, 0x46, 0x49, 0xfb];

static FORMAT_LINE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"(?i)file format:\s*qcow2"));

fn reports_qcow2(info: &str) -> bool {
    match &*FORMAT_LINE {
        Ok(re) => re.is_match(info),
        Err(err) => {
            log::error!("qcow2 format pattern failed to compile: {}", err);
            false
        }
    }
}

pub(super) fn has_magic(path: &Path) -> io::Result<bool> {
    let mut header = [0u8; 4];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(header == QCOW2_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

pub(super) fn validate<H: ProbeOps + ?Sized>(hal: &H, config: &NbdConfig, path: &Path) -> bool {
    match hal.image_info(&config.tools.qemu_img, path, config.timeouts.inspect()) {
        Ok(info) => reports_qcow2(&info),
        Err(err) => {
            log::warn!("{} info {} failed: {}", config.tools.qemu_img, path.display(), err);
            false
        }
    }
}
