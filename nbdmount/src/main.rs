use clap::Parser;
use nbdmount_hal::{LinuxHal, NbdHal};
use std::sync::Arc;

mod actions;
mod cancel;
mod cli;

fn main() {
    let cli = cli::Cli::parse();
    nbdmount_core::logging::init(cli.debug);

    if let Err(err) = cancel::install_ctrlc_handler() {
        log::warn!("Could not install Ctrl+C handler: {}", err);
    }

    let code = actions::run(&cli, |config| -> Arc<dyn NbdHal> {
        Arc::new(LinuxHal::with_roots(
            config.dev_dir.clone(),
            config.sys_block_dir.clone(),
            config.proc_mounts.clone(),
        ))
    });
    std::process::exit(code);
}
