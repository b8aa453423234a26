use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod mqtt;

use cellbms_lib::config::BmsConfig;
use cellbms_lib::serialport::SerialLink;
use commandline::{CliArgs, CliCommands, DaemonOutput};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = match &args.config_file {
        Some(path) => BmsConfig::load(path)
            .with_context(|| format!("Cannot load configuration from '{}'", path))?,
        None => BmsConfig::default(),
    };
    debug!("Configuration: {config:?}");

    let link = SerialLink::new(&args.device, args.timeout)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;

    match args.command {
        // One complete poll cycle, then exit with its summary printed.
        CliCommands::Monitor => {
            daemon::run(link, config, DaemonOutput::Console, args.tick, false, Some(1))
        }
        CliCommands::Charge => {
            daemon::run(link, config, DaemonOutput::Console, args.tick, true, None)
        }
        CliCommands::Daemon { output, charge } => {
            daemon::run(link, config, output, args.tick, charge, None)
        }
    }
}
