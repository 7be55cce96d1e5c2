mod cli;
mod logging;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use accel_core::error::HookError;
use accel_core::world::World;
use accel_core::{provision, selector};

use cli::{Cli, Command};

const CONFIG_PATH: &str = "/etc/acceleration.json";

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Command::Configure(args) = &cli.command;

    let level = logging::level_for_syslog_cap(args.loglevel);
    let _guard = logging::init(args.log.as_deref(), level);

    match run_configure(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "configure failed");
            ExitCode::FAILURE
        }
    }
}

fn run_configure(args: &cli::ConfigureArgs) -> Result<(), HookError> {
    tracing::info!(devices = %args.devices, rootfs = %args.rootfs, "configure devices");

    let mut world = World::build(Path::new(CONFIG_PATH))?;

    let attached = selector::select_devices(&world, &args.devices)?;
    selector::reconcile_functions(&mut world, &attached, &args.functions)?;

    provision::provision_container(&world, args.pid, Path::new(&args.rootfs), &attached)?;

    Ok(())
}
