use nbdmount_core::{ErrorKind, NbdConfig, NbdError, NbdMountTool, Sleeper};
use nbdmount_hal::{FakeFailure, FakeHal, Operation};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

fn qcow2_image(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("guest.qcow2");
    let mut bytes = nbdmount_core::format::QCOW2_MAGIC.to_vec();
    bytes.resize(2048, 0);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn qcow2_hal() -> FakeHal {
    let hal = FakeHal::new();
    hal.set_stdout("qemu-img", "image: guest.qcow2\nfile format: qcow2\n");
    hal
}

#[test]
fn qcow2_image_mounts_on_first_free_slot() {
    let dir = tempfile::tempdir().unwrap();
    let image = qcow2_image(dir.path());
    let hal = qcow2_hal();
    hal.add_slot(0, 8388608);
    hal.add_unreadable_slot(1);
    hal.add_slot(2, 0);
    hal.script_partitions(
        "/dev/nbd2",
        vec![vec![], vec!["/dev/nbd2p1".to_string(), "/dev/nbd2p2".to_string()]],
    );

    let tool = NbdMountTool::new(Arc::new(hal.clone()), NbdConfig::default(), &image, None, true)
        .unwrap()
        .with_sleeper(Arc::new(NoSleep));
    let mounted = tool
        .mount_image(Some(&dir.path().join("mnt")), None)
        .unwrap();

    let sources: Vec<&str> = mounted.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(sources, ["/dev/nbd2p1", "/dev/nbd2p2"]);
    assert!(hal.has_operation(|op| matches!(
        op,
        Operation::NbdConnect { device, format, .. } if device == "/dev/nbd2" && format == "qcow2"
    )));
    assert!(hal.mounted_paths().is_empty());
}

#[test]
fn busy_pool_reports_device_error() {
    let dir = tempfile::tempdir().unwrap();
    let image = qcow2_image(dir.path());
    let hal = qcow2_hal();
    hal.add_slot(0, 1);

    let config = NbdConfig {
        max_slots: 1,
        ..NbdConfig::default()
    };
    let tool = NbdMountTool::new(Arc::new(hal), config, &image, Some("qcow2"), true).unwrap();
    let err = tool.list_partitions().unwrap_err();

    assert!(matches!(err, NbdError::DeviceNotFound { max_slots: 1 }));
    assert_eq!(err.kind(), ErrorKind::Device);
}

#[test]
fn connect_failure_is_device_error_and_nothing_is_mounted() {
    let dir = tempfile::tempdir().unwrap();
    let image = qcow2_image(dir.path());
    let hal = qcow2_hal();
    hal.add_slot(0, 0);
    hal.fail_on(
        |op| matches!(op, Operation::NbdConnect { .. }),
        FakeFailure::exit(1, "qemu-nbd: Failed to open /dev/nbd0"),
    );

    let tool = NbdMountTool::new(Arc::new(hal.clone()), NbdConfig::default(), &image, None, true)
        .unwrap();
    let err = tool.mount_image(Some(&dir.path().join("mnt")), None).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(err.to_string().contains("Failed to open"));
    assert!(!hal.has_operation(|op| matches!(op, Operation::Mount { .. })));
}

#[test]
fn image_info_serializes_to_json() {
    let dir = tempfile::tempdir().unwrap();
    let image = qcow2_image(dir.path());
    let tool = NbdMountTool::new(Arc::new(qcow2_hal()), NbdConfig::default(), &image, None, false)
        .unwrap();

    let json = serde_json::to_value(tool.image_info().unwrap()).unwrap();
    assert_eq!(json["format"], "qcow2");
    assert_eq!(json["size_bytes"], 2048);
    assert_eq!(json["read_only"], false);
}
