use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run one complete poll cycle of the cell-monitor chain and print its min/max summary
    Monitor,
    /// Poll the chain and regulate the charger from the pack's status frames
    Charge,
    /// Run continuously, publishing pack telemetry
    Daemon {
        /// Output destination for telemetry
        #[command(subcommand)]
        output: DaemonOutput,
        /// Also regulate the charger while running
        #[clap(long, action)]
        charge: bool,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Print each completed poll cycle to the standard output (console).
    Console,
    /// Publish each completed poll cycle to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "battery management master for serial cell-monitor chains"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// YAML configuration file for pack and charger parameters;
    /// built-in defaults apply when absent
    #[arg(short, long)]
    pub config_file: Option<String>,

    /// Length of one timer tick; countdowns in the configuration are
    /// expressed in these units (e.g., "1ms", "10ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "10ms")]
    pub tick: Duration,

    /// Timeout for serial I/O operations (e.g., "100ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub timeout: Duration,
}
