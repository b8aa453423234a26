use anyhow::{Context, Result};
use cellbms_lib::bms::{Bms, DataBus};
use cellbms_lib::charge::Charger;
use cellbms_lib::config::BmsConfig;
use cellbms_lib::serialport::SerialLink;
use cellbms_lib::{Fault, FaultLine};
use log::{debug, info, warn};
use serde_json::json;
use std::time::Duration;

use crate::{commandline, mqtt};

/// Fault sink for the daemon: every signal becomes a log line.
#[derive(Debug, Default)]
struct LogFaults {
    total: u64,
}

impl FaultLine for LogFaults {
    fn raise(&mut self, fault: Fault) {
        self.total += 1;
        warn!("Fault raised: {fault} ({} since start)", self.total);
    }
}

/// Charger backend that records the regulation output. The control
/// loop only needs the last commanded current and the end-of-charge
/// latch; the actual charger bus is outside this tool.
#[derive(Debug, Default)]
struct LogCharger {
    last_voltage: u16,
    last_current: u16,
    eoc: bool,
}

impl Charger for LogCharger {
    fn send_request(&mut self, voltage: u16, current: u16, off: bool) {
        self.last_voltage = voltage;
        self.last_current = current;
        debug!("Charger request: {voltage} dV, {current} dA, off={off}");
    }

    fn shutdown(&mut self) {
        self.eoc = true;
        info!("Charge complete, charger shut down");
    }

    fn end_of_charge(&self) -> bool {
        self.eoc
    }

    fn last_current(&self) -> u16 {
        self.last_current
    }
}

/// Collects telemetry frames emitted during one pass of the loop.
#[derive(Debug, Default)]
struct CollectBus {
    frames: Vec<(u16, [u16; 4])>,
}

impl DataBus for CollectBus {
    fn transmit(&mut self, identifier: u16, payload: [u16; 4]) {
        self.frames.push((identifier, payload));
    }
}

fn publish_frame(
    publisher: &mut mqtt::MqttPublisher,
    format: &commandline::MqttFormat,
    identifier: u16,
    payload: [u16; 4],
) -> Result<()> {
    let [min_mv, max_mv, min_cell, max_cell] = payload;
    match format {
        commandline::MqttFormat::Json => {
            let message = json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "identifier": identifier,
                "min_mv": min_mv,
                "max_mv": max_mv,
                "min_cell": min_cell,
                "max_cell": max_cell,
            });
            let payload = serde_json::to_string(&message)
                .with_context(|| "Failed to serialize telemetry to JSON")?;
            let topic = publisher.topic().to_string();
            publisher.publish(&topic, &payload)?;
        }
        commandline::MqttFormat::Simple => {
            let base = publisher.topic().to_string();
            let fields = [
                ("min_mv", min_mv),
                ("max_mv", max_mv),
                ("min_cell", min_cell),
                ("max_cell", max_cell),
            ];
            for (name, value) in fields {
                publisher.publish(&format!("{base}/pack/{name}"), &value.to_string())?;
            }
        }
    }
    Ok(())
}

fn print_frame(payload: [u16; 4]) {
    let [min_mv, max_mv, min_cell, max_cell] = payload;
    println!(
        "{} min {min_mv} mV (cell {min_cell}), max {max_mv} mV (cell {max_cell})",
        chrono::Local::now().to_rfc3339()
    );
}

/// Runs the poll loop. Each iteration is one timer tick: move inbound
/// bytes into the core, process them, advance the countdowns, and
/// flush outbound bytes back to the port. With `max_cycles` set the
/// loop returns after that many completed poll cycles (telemetry
/// frames); otherwise it runs until interrupted.
pub fn run(
    mut link: SerialLink,
    config: BmsConfig,
    output: commandline::DaemonOutput,
    tick: Duration,
    charging: bool,
    max_cycles: Option<u64>,
) -> Result<()> {
    info!("Starting poll loop: output={output:?}, tick={tick:?}, charging={charging}");

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;
    if let commandline::DaemonOutput::Mqtt { config_file, .. } = &output {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");
        mqtt_publisher = Some(
            mqtt::MqttPublisher::new(config).with_context(|| "Failed to create MQTT publisher")?,
        );
    }

    let mut bms = Bms::new(config);
    let mut faults = LogFaults::default();
    let mut charger = LogCharger::default();
    let mut bus = CollectBus::default();

    bms.init(&mut faults);
    link.pump_tx(&mut bms)?;

    let mut completed_cycles: u64 = 0;
    loop {
        link.pump_rx(&mut bms, &mut faults)?;
        bms.process_rx(charging, &mut charger, &mut bus, &mut faults);
        bms.on_tick(&mut faults);

        for (identifier, payload) in bus.frames.drain(..).collect::<Vec<_>>() {
            match &output {
                commandline::DaemonOutput::Console => print_frame(payload),
                commandline::DaemonOutput::Mqtt { format, .. } => {
                    if let Some(publisher) = mqtt_publisher.as_mut() {
                        if let Err(e) = publish_frame(publisher, format, identifier, payload) {
                            log::error!("Failed to publish telemetry: {e:?}");
                        }
                    }
                }
            }
            if charging && !charger.end_of_charge() {
                // Announce the operating point on the monitor channel
                // alongside each cycle's telemetry.
                bms.send_charger_comment(charger.last_voltage, charger.last_current, &mut faults);
            }
            completed_cycles += 1;
        }

        link.pump_tx(&mut bms)?;
        if matches!(max_cycles, Some(limit) if completed_cycles >= limit) {
            return Ok(());
        }
        std::thread::sleep(tick);
    }
}
