//! Command line surface (§4.9).

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "accel-hook", about = "Container runtime prestart hook for accelerator devices")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure a container with accelerator support.
    Configure(ConfigureArgs),
}

#[derive(Debug, Args)]
pub struct ConfigureArgs {
    /// Container PID.
    #[arg(short, long)]
    pub pid: i32,

    /// Container root filesystem.
    #[arg(short, long)]
    pub rootfs: String,

    /// List of requested accelerators (comma separated, "all", BDF, or slot id).
    #[arg(short, long, default_value = "")]
    pub devices: String,

    /// List of expected functions (comma separated).
    #[arg(short, long, default_value = "")]
    pub functions: String,

    /// Log file absolute path and name.
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,

    /// Log level (syslog facility, 0 = emergency .. 7 = debug).
    #[arg(short = 'L', long = "loglevel", default_value_t = 3)]
    pub loglevel: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_applies_documented_defaults() {
        let cli = Cli::parse_from(["accel-hook", "configure", "--pid", "123", "--rootfs", "/rootfs"]);
        let Command::Configure(args) = cli.command;
        assert_eq!(args.pid, 123);
        assert_eq!(args.rootfs, "/rootfs");
        assert_eq!(args.devices, "");
        assert_eq!(args.functions, "");
        assert_eq!(args.log, None);
        assert_eq!(args.loglevel, 3);
    }

    #[test]
    fn configure_accepts_all_flags() {
        let cli = Cli::parse_from([
            "accel-hook", "configure",
            "--pid", "42", "--rootfs", "/mnt/rootfs",
            "--devices", "all", "--functions", "gzip",
            "--log", "/var/log/accel-hook.log", "--loglevel", "7",
        ]);
        let Command::Configure(args) = cli.command;
        assert_eq!(args.devices, "all");
        assert_eq!(args.loglevel, 7);
        assert_eq!(args.log.as_deref(), Some("/var/log/accel-hook.log"));
    }
}
