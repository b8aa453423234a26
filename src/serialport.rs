use crate::bms::Bms;
use crate::error::{Fault, FaultLine};
use anyhow::{Context, Result};
use std::time::Duration;

/// Synchronous serial link pumping bytes between a port and the core.
///
/// The core never blocks; this transport does. Call [`pump_tx`] after
/// anything that may have queued outbound bytes and [`pump_rx`] at
/// the tick rate.
///
/// [`pump_tx`]: SerialLink::pump_tx
/// [`pump_rx`]: SerialLink::pump_rx
#[derive(Debug)]
pub struct SerialLink {
    serial: Box<dyn serialport::SerialPort>,
}

impl SerialLink {
    /// Opens `port` at the cell-monitor chain rate, 9600 8N1.
    pub fn new(port: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            serial: serialport::new(port, 9600)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(timeout)
                .open()
                .with_context(|| format!("Cannot open serial port '{}'", port))?,
        })
    }

    /// Writes every queued outbound byte to the port. Returns the
    /// number of bytes written.
    pub fn pump_tx(&mut self, bms: &mut Bms) -> Result<usize> {
        let mut tx_buffer = Vec::with_capacity(bms.tx_pending());
        while let Some(byte) = bms.next_tx_byte() {
            tx_buffer.push(byte);
        }
        if tx_buffer.is_empty() {
            return Ok(0);
        }
        log::trace!("pump_tx: {:02X?}", tx_buffer);
        self.serial
            .write_all(&tx_buffer)
            .with_context(|| "Cannot write to serial")?;
        Ok(tx_buffer.len())
    }

    /// Reads whatever the port has pending into the core's inbound
    /// queue. A full queue raises a fault and drops the byte rather
    /// than blocking. Returns the number of bytes read.
    pub fn pump_rx(&mut self, bms: &mut Bms, faults: &mut dyn FaultLine) -> Result<usize> {
        let pending = self
            .serial
            .bytes_to_read()
            .with_context(|| "Cannot read number of pending bytes")? as usize;
        if pending == 0 {
            return Ok(0);
        }
        let mut rx_buffer = vec![0; pending];
        let received = self
            .serial
            .read(rx_buffer.as_mut_slice())
            .with_context(|| "Cannot read pending bytes")?;
        log::trace!("pump_rx: {:02X?}", &rx_buffer[..received]);
        for &byte in &rx_buffer[..received] {
            if bms.receive_byte(byte).is_err() {
                faults.raise(Fault::QueueOverflow);
            }
        }
        Ok(received)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.serial
            .set_timeout(timeout)
            .map_err(anyhow::Error::from)
    }
}
