//! Action dispatch and exit-code mapping.

use crate::cli::{Action, Cli};
use anyhow::Context;
use nbdmount_core::cancel::is_interrupted;
use nbdmount_core::{preflight, NbdConfig, NbdError, NbdMountTool};
use nbdmount_hal::NbdHal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_OK: i32 = 0;
pub const EXIT_SETUP: i32 = 1;
pub const EXIT_FAILED: i32 = 2;
pub const EXIT_UNEXPECTED: i32 = 3;
pub const EXIT_INTERRUPTED: i32 = 130;

const HOLD_POLL: Duration = Duration::from_millis(200);

/// Run the requested action and return the process exit code.
///
/// `make_hal` builds the system boundary once the configuration is known.
pub fn run(cli: &Cli, make_hal: impl FnOnce(&NbdConfig) -> Arc<dyn NbdHal>) -> i32 {
    let config = match NbdConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{}", err);
            return EXIT_SETUP;
        }
    };
    let hal = make_hal(&config);

    if let Err(err) = preflight::check(&*hal, &config) {
        log::error!("Prerequisite check failed: {}", err);
        return EXIT_SETUP;
    }
    if cli.action == Action::Check {
        log::info!("All prerequisites satisfied");
        return EXIT_OK;
    }

    let tool = match NbdMountTool::new(hal, config, &cli.image, cli.format.as_deref(), !cli.rw) {
        Ok(tool) => tool,
        Err(err) if interrupted(&err) => {
            log::warn!("Operation interrupted by user");
            return EXIT_INTERRUPTED;
        }
        Err(err) => {
            log::error!("{}", err);
            if matches!(err, NbdError::Format(_)) {
                log::info!("Hint: pass the format explicitly, e.g. --format qcow2");
            }
            return EXIT_SETUP;
        }
    };

    let result = match cli.action {
        Action::Mount => action_mount(&tool, cli),
        Action::List => action_list(&tool, cli),
        Action::Info => action_info(&tool, cli),
        Action::Check => Ok(EXIT_OK),
    };
    result.unwrap_or_else(|err| exit_code_for(&err))
}

/// Ctrl+C also reaches the running child, so a failure after an interrupt is reported as
/// the interrupt, whatever error the killed command produced.
fn interrupted(err: &NbdError) -> bool {
    matches!(err, NbdError::Interrupted) || is_interrupted()
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<NbdError>() {
        Some(nbd) if interrupted(nbd) => {
            log::warn!("Operation interrupted by user");
            EXIT_INTERRUPTED
        }
        Some(nbd) => {
            log::error!("Operation failed ({:?}): {:#}", nbd.kind(), err);
            EXIT_FAILED
        }
        None => {
            log::error!("Unexpected error: {:#}", err);
            EXIT_UNEXPECTED
        }
    }
}

fn action_mount(tool: &NbdMountTool, cli: &Cli) -> anyhow::Result<i32> {
    log::info!("Mounting partitions of {}", tool.image().path.display());
    let mount_dir = cli.mount_dir.as_deref();

    let mounted = if cli.hold {
        tool.mount_image_with(mount_dir, None, |mounted| {
            report_mounts(mounted, cli.json)?;
            if !mounted.is_empty() {
                log::info!("Holding mounts, press Ctrl+C to unmount and disconnect");
                while !is_interrupted() {
                    std::thread::sleep(HOLD_POLL);
                }
            }
            Ok(mounted.to_vec())
        })?
    } else {
        let mounted = tool.mount_image(mount_dir, None)?;
        report_mounts(&mounted, cli.json)?;
        if !mounted.is_empty() {
            log::info!("Partitions have been unmounted again; use --hold to keep them mounted");
        }
        mounted
    };

    if mounted.is_empty() {
        log::error!("No partition could be mounted");
        return Ok(EXIT_SETUP);
    }
    Ok(EXIT_OK)
}

fn report_mounts(mounted: &[(String, PathBuf)], json: bool) -> nbdmount_core::NbdResult<()> {
    if json {
        let map: serde_json::Map<String, serde_json::Value> = mounted
            .iter()
            .map(|(part, target)| (part.clone(), target.display().to_string().into()))
            .collect();
        println!("{}", serde_json::Value::Object(map));
        return Ok(());
    }
    for (part, target) in mounted {
        println!("  {:20} -> {}", part, target.display());
    }
    Ok(())
}

fn action_list(tool: &NbdMountTool, cli: &Cli) -> anyhow::Result<i32> {
    log::info!("Detecting partitions...");
    let partitions = tool.list_partitions()?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string(&partitions).context("serializing partition list")?
        );
    } else if partitions.is_empty() {
        log::warn!("No partitions found (the image may hold a bare filesystem)");
    } else {
        println!("Found {} partition(s):", partitions.len());
        for (i, part) in partitions.iter().enumerate() {
            println!("  {}. {}", i + 1, part);
        }
    }
    Ok(EXIT_OK)
}

fn action_info(tool: &NbdMountTool, cli: &Cli) -> anyhow::Result<i32> {
    let info = tool.image_info()?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("serializing image info")?
        );
        return Ok(EXIT_OK);
    }
    println!("Image information:");
    println!("  Path:   {}", info.path.display());
    println!("  Format: {}", info.format);
    println!("  Size:   {:.2} GB ({} bytes)", info.size_gb, info.size_bytes);
    println!(
        "  Mode:   {}",
        if info.read_only { "read-only" } else { "read-write" }
    );
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use nbdmount_hal::{FakeFailure, FakeHal, Operation};
    use nbdmount_core::cancel::{register, unregister};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fail the first operation matching `op` as if its process had been killed by Ctrl+C.
    fn interrupt_on(
        hal: &FakeHal,
        flag: &Arc<AtomicBool>,
        op: impl Fn(&Operation) -> bool + Send + Sync + 'static,
    ) {
        let flag = flag.clone();
        hal.fail_on_times(
            move |o| {
                let hit = op(o);
                if hit {
                    flag.store(true, Ordering::SeqCst);
                }
                hit
            },
            FakeFailure::exit(-1, ""),
            1,
        );
    }

    fn run_interrupted(hal: &FakeHal, cli: &Cli, flag: Arc<AtomicBool>) -> i32 {
        let _guard = INTERRUPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        register(flag);
        let hal_for_run = hal.clone();
        let code = run(cli, move |_| -> Arc<dyn NbdHal> { Arc::new(hal_for_run) });
        unregister();
        code
    }

    fn ready_hal() -> FakeHal {
        let hal = FakeHal::new();
        hal.add_existing_path("/sys/module/nbd");
        hal.add_slot(0, 0);
        hal
    }

    fn raw_image(dir: &Path) -> PathBuf {
        let image = dir.join("disk.img");
        std::fs::write(&image, vec![0u8; 1024]).unwrap();
        image
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("nbdmount").chain(args.iter().copied())).unwrap()
    }

    /// The interrupt flag is process-wide; tests touching it must not overlap with others.
    static INTERRUPT_LOCK: Mutex<()> = Mutex::new(());

    fn run_with(hal: &FakeHal, cli: &Cli) -> i32 {
        let _guard = INTERRUPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let hal = hal.clone();
        run(cli, move |_| -> Arc<dyn NbdHal> { Arc::new(hal) })
    }

    #[test]
    fn check_succeeds_without_an_image() {
        let hal = ready_hal();
        assert_eq!(run_with(&hal, &cli(&["/nonexistent.img", "check"])), EXIT_OK);
    }

    #[test]
    fn failed_prerequisites_exit_setup() {
        let hal = ready_hal();
        hal.set_root(false);
        assert_eq!(run_with(&hal, &cli(&["/nonexistent.img", "check"])), EXIT_SETUP);
    }

    #[test]
    fn undetectable_image_exits_setup() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("odd.bin");
        std::fs::write(&image, vec![1u8; 700]).unwrap();
        let hal = ready_hal();
        let code = run_with(&hal, &cli(&[image.to_str().unwrap(), "info"]));
        assert_eq!(code, EXIT_SETUP);
    }

    #[test]
    fn info_and_list_succeed() {
        let dir = TempDir::new().unwrap();
        let image = raw_image(dir.path());
        let hal = ready_hal();
        hal.with_partitions("/dev/nbd0", 2);

        assert_eq!(run_with(&hal, &cli(&[image.to_str().unwrap(), "info", "--json"])), EXIT_OK);
        assert_eq!(run_with(&hal, &cli(&[image.to_str().unwrap(), "list"])), EXIT_OK);
        assert!(hal.has_operation(|op| matches!(op, Operation::NbdDisconnect { .. })));
    }

    #[test]
    fn mount_reports_and_releases() {
        let dir = TempDir::new().unwrap();
        let image = raw_image(dir.path());
        let mnt = dir.path().join("mnt");
        let hal = ready_hal();
        hal.with_partitions("/dev/nbd0", 1);

        let code = run_with(
            &hal,
            &cli(&[image.to_str().unwrap(), "mount", "-d", mnt.to_str().unwrap()]),
        );
        assert_eq!(code, EXIT_OK);
        assert!(hal.mounted_paths().is_empty());
    }

    #[test]
    fn mount_with_nothing_mounted_exits_setup() {
        let dir = TempDir::new().unwrap();
        let image = raw_image(dir.path());
        let mnt = dir.path().join("mnt");
        let hal = ready_hal();
        hal.with_partitions("/dev/nbd0", 2);
        hal.fail_on(
            |op| matches!(op, Operation::Mount { .. }),
            FakeFailure::exit(32, "unknown filesystem type"),
        );

        let code = run_with(
            &hal,
            &cli(&[image.to_str().unwrap(), "mount", "-d", mnt.to_str().unwrap()]),
        );
        assert_eq!(code, EXIT_SETUP);
    }

    #[test]
    fn operation_failure_exits_failed() {
        let dir = TempDir::new().unwrap();
        let image = raw_image(dir.path());
        let hal = ready_hal();
        hal.fail_on(
            |op| matches!(op, Operation::NbdConnect { .. }),
            FakeFailure::exit(1, "Failed to set NBD socket"),
        );

        assert_eq!(run_with(&hal, &cli(&[image.to_str().unwrap(), "list"])), EXIT_FAILED);
    }

    #[test]
    fn bad_config_file_exits_setup() {
        let dir = TempDir::new().unwrap();
        let cfg = dir.path().join("nbdmount.toml");
        std::fs::write(&cfg, "max_slots = [").unwrap();
        let hal = ready_hal();

        let code = run_with(
            &hal,
            &cli(&["/x.img", "check", "--config", cfg.to_str().unwrap()]),
        );
        assert_eq!(code, EXIT_SETUP);
    }

    #[test]
    fn unexpected_errors_map_to_three() {
        let _guard = INTERRUPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(exit_code_for(&err), EXIT_UNEXPECTED);
        let err = anyhow::Error::new(NbdError::Interrupted).context("mounting");
        assert_eq!(exit_code_for(&err), EXIT_INTERRUPTED);
    }

    #[test]
    fn ctrlc_killing_connect_exits_interrupted() {
        let dir = TempDir::new().unwrap();
        let image = raw_image(dir.path());
        let hal = ready_hal();
        let flag = Arc::new(AtomicBool::new(false));
        interrupt_on(&hal, &flag, |op| matches!(op, Operation::NbdConnect { .. }));

        let code = run_interrupted(&hal, &cli(&[image.to_str().unwrap(), "list"]), flag);
        assert_eq!(code, EXIT_INTERRUPTED);
    }

    #[test]
    fn ctrlc_killing_format_inspection_exits_interrupted() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("disk.qcow2");
        let mut bytes = nbdmount_core::format::QCOW2_MAGIC.to_vec();
        bytes.resize(1024, 0);
        std::fs::write(&image, bytes).unwrap();
        let hal = ready_hal();
        let flag = Arc::new(AtomicBool::new(false));
        interrupt_on(&hal, &flag, |op| matches!(op, Operation::ImageInfo { .. }));

        let code = run_interrupted(&hal, &cli(&[image.to_str().unwrap(), "info"]), flag);
        assert_eq!(code, EXIT_INTERRUPTED);
    }
}
