//! Subsystem configuration with YAML loading and per-field defaults.

use crate::Error;
use serde::{Deserialize, Serialize};

/// Charge-loop limits and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeConfig {
    /// Charger voltage limit in tenths of a volt.
    #[serde(default = "ChargeConfig::default_voltage_limit")]
    pub voltage_limit: u16,
    /// Charger current limit in tenths of an amp.
    #[serde(default = "ChargeConfig::default_current_limit")]
    pub current_limit: u16,
    /// Cutoff current (usually 0.05C) in tenths of an amp; bypass
    /// soaking only counts below this commanded current.
    #[serde(default = "ChargeConfig::default_cutoff_current")]
    pub cutoff_current: u16,
    /// Ticks from first all-bypass detection to charger turn-off.
    #[serde(default = "ChargeConfig::default_soak_ticks")]
    pub soak_ticks: u32,
}

impl ChargeConfig {
    /// 60 cells at 3.40 V each.
    fn default_voltage_limit() -> u16 {
        2040
    }

    /// 5.5 A.
    fn default_current_limit() -> u16 {
        55
    }

    /// 2.0 A.
    fn default_cutoff_current() -> u16 {
        20
    }

    /// Five minutes at the default 10 ms tick.
    fn default_soak_ticks() -> u32 {
        5 * 60 * 100
    }
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            voltage_limit: Self::default_voltage_limit(),
            current_limit: Self::default_current_limit(),
            cutoff_current: Self::default_cutoff_current(),
            soak_ticks: Self::default_soak_ticks(),
        }
    }
}

/// Top-level configuration for the BMS core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmsConfig {
    /// Number of cell monitors in the chain; poll targets run [1, N].
    #[serde(default = "BmsConfig::default_cell_count")]
    pub cell_count: u16,
    /// Insert/verify an XOR checksum on every framed command and line.
    #[serde(default = "BmsConfig::default_checksum_mode")]
    pub checksum_mode: bool,
    /// Ticks to wait for an acknowledging reply before resending.
    #[serde(default = "BmsConfig::default_ack_timeout_ticks")]
    pub ack_timeout_ticks: u32,
    /// Ticks between poll-cycle restarts (45 s at the 10 ms tick).
    #[serde(default = "BmsConfig::default_poll_interval_ticks")]
    pub poll_interval_ticks: u32,
    /// Outbound byte-queue capacity.
    #[serde(default = "BmsConfig::default_queue_size")]
    pub tx_queue_size: usize,
    /// Inbound byte-queue capacity.
    #[serde(default = "BmsConfig::default_queue_size")]
    pub rx_queue_size: usize,
    /// Inbound line-buffer capacity; a longer line is a fault.
    #[serde(default = "BmsConfig::default_line_size")]
    pub line_buffer_size: usize,
    #[serde(default)]
    pub charge: ChargeConfig,
}

impl BmsConfig {
    fn default_cell_count() -> u16 {
        60
    }

    fn default_checksum_mode() -> bool {
        true
    }

    fn default_ack_timeout_ticks() -> u32 {
        100
    }

    fn default_poll_interval_ticks() -> u32 {
        4500
    }

    fn default_queue_size() -> usize {
        64
    }

    fn default_line_size() -> usize {
        16
    }

    /// Loads a YAML configuration file; missing fields take defaults.
    pub fn load(path: &str) -> Result<Self, Error> {
        log::debug!("Loading config file from {path:?}");
        let file = std::fs::File::open(path)?;
        Ok(serde_yaml::from_reader(&file)?)
    }
}

impl Default for BmsConfig {
    fn default() -> Self {
        Self {
            cell_count: Self::default_cell_count(),
            checksum_mode: Self::default_checksum_mode(),
            ack_timeout_ticks: Self::default_ack_timeout_ticks(),
            poll_interval_ticks: Self::default_poll_interval_ticks(),
            tx_queue_size: Self::default_queue_size(),
            rx_queue_size: Self::default_queue_size(),
            line_buffer_size: Self::default_line_size(),
            charge: ChargeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_sixty_cell_pack() {
        let config = BmsConfig::default();
        assert_eq!(config.cell_count, 60);
        assert!(config.checksum_mode);
        assert_eq!(config.charge.voltage_limit, 2040);
        assert_eq!(config.charge.current_limit, 55);
        assert_eq!(config.charge.cutoff_current, 20);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cell_count: 19\ncharge:\n  current_limit: 30").unwrap();
        let config = BmsConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.cell_count, 19);
        assert_eq!(config.charge.current_limit, 30);
        // Everything else falls back to the defaults.
        assert_eq!(config.ack_timeout_ticks, 100);
        assert_eq!(config.charge.cutoff_current, 20);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            BmsConfig::load("/nonexistent/cellbms.yaml"),
            Err(Error::Io(_))
        ));
    }
}
