//! Core context for the cell-monitor chain: round-robin voltage
//! polling, ack/retry of the one outstanding command, inbound line
//! framing, and min/max telemetry.
//!
//! All state lives in an owned [`Bms`] value; the charger, data bus
//! and fault line are narrow collaborators passed into each call, so
//! multiple instances and deterministic tests come for free.

use crate::charge::{ChargeController, Charger};
use crate::config::BmsConfig;
use crate::error::{Fault, FaultLine};
use crate::protocol;
use crate::queue::ByteQueue;
use crate::Error;

/// Vehicle data-bus collaborator; a single fire-and-forget transmit
/// primitive is all this core assumes.
pub trait DataBus {
    fn transmit(&mut self, identifier: u16, payload: [u16; 4]);
}

/// Sentinel minimum voltage before any reply arrives in a cycle.
const MIN_MV_RESET: u16 = 9999;

#[derive(Debug)]
pub struct Bms {
    config: BmsConfig,
    tx: ByteQueue,
    rx: ByteQueue,
    /// Bytes of the response currently being assembled, terminator
    /// included once seen.
    line: Vec<u8>,
    /// Last transmitted frame, retained verbatim (post-checksum) so a
    /// resend puts identical bytes on the wire.
    last_frame: Vec<u8>,
    awaiting_ack: bool,
    ack_countdown: u32,
    /// Cell id the next voltage request addresses, in [1, cell_count].
    cell: u16,
    min_mv: u16,
    max_mv: u16,
    min_id: u16,
    max_id: u16,
    poll_countdown: u32,
    controller: ChargeController,
}

impl Bms {
    pub fn new(config: BmsConfig) -> Self {
        let controller = ChargeController::new(config.charge.clone());
        Self {
            tx: ByteQueue::new(config.tx_queue_size),
            rx: ByteQueue::new(config.rx_queue_size),
            line: Vec::with_capacity(config.line_buffer_size),
            last_frame: Vec::new(),
            awaiting_ack: false,
            ack_countdown: 0,
            cell: 1,
            min_mv: MIN_MV_RESET,
            max_mv: 0,
            min_id: 0,
            max_id: 0,
            poll_countdown: config.poll_interval_ticks,
            controller,
            config,
        }
    }

    /// One-time initialization: checksum-mode handshake, status-output
    /// enable, then the first voltage request of a poll cycle.
    pub fn init(&mut self, faults: &mut dyn FaultLine) {
        self.line.clear();
        if self.config.checksum_mode {
            // A framed toggle would carry its own checksum and read as
            // two toggles on the far side, so this one goes out raw.
            self.send_raw(protocol::CHECKSUM_TOGGLE, faults);
        } else {
            // Double toggle: turns checksumming off if it was on,
            // twice (net zero) if it was already off.
            self.send_command(protocol::CHECKSUM_OFF, faults);
        }
        self.send_command(protocol::STATUS_ENABLE, faults);
        self.send_voltage_request(faults);
    }

    /// Receive-notification side: appends one raw byte from the wire.
    pub fn receive_byte(&mut self, byte: u8) -> Result<(), Error> {
        self.rx.enqueue(byte)
    }

    /// Transmit-notification side: next byte to put on the wire, or
    /// `None` once the outbound queue has drained.
    pub fn next_tx_byte(&mut self) -> Option<u8> {
        self.tx.dequeue()
    }

    pub fn tx_pending(&self) -> usize {
        self.tx.len()
    }

    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    pub fn current_cell(&self) -> u16 {
        self.cell
    }

    pub fn charge_controller(&self) -> &ChargeController {
        &self.controller
    }

    /// Enqueues bytes without framing, retention or ack arming.
    fn send_raw(&mut self, bytes: &[u8], faults: &mut dyn FaultLine) -> bool {
        if self.tx.remaining_capacity() < bytes.len() {
            faults.raise(Fault::QueueOverflow);
            return false;
        }
        for &b in bytes {
            // Space was checked above; enqueue cannot fail here.
            let _ = self.tx.enqueue(b);
        }
        true
    }

    /// Frames a command through the codec, retains it, and transmits.
    fn send_command(&mut self, command: &[u8], faults: &mut dyn FaultLine) -> bool {
        self.last_frame = protocol::encode_frame(command, self.config.checksum_mode);
        self.resend_last_frame(faults)
    }

    /// Puts the retained frame on the wire, used both for first sends
    /// and for timeout resends. Arms the ack timer on success; on
    /// insufficient queue space it raises a fault and changes nothing.
    fn resend_last_frame(&mut self, faults: &mut dyn FaultLine) -> bool {
        if self.tx.remaining_capacity() < self.last_frame.len() {
            faults.raise(Fault::QueueOverflow);
            return false;
        }
        for i in 0..self.last_frame.len() {
            let _ = self.tx.enqueue(self.last_frame[i]);
        }
        self.awaiting_ack = true;
        self.ack_countdown = self.config.ack_timeout_ticks;
        true
    }

    /// Sends the voltage request for the currently targeted cell.
    pub fn send_voltage_request(&mut self, faults: &mut dyn FaultLine) -> bool {
        let cmd = protocol::make_volt_command(self.cell);
        self.send_command(&cmd, faults)
    }

    /// Announces the charger's measured totals as a comment frame on
    /// the cell-monitor channel. Debugging aid.
    pub fn send_charger_comment(
        &mut self,
        volts: u16,
        amps: u16,
        faults: &mut dyn FaultLine,
    ) -> bool {
        let cmd = protocol::make_charger_comment(volts, amps);
        self.send_command(&cmd, faults)
    }

    /// Drains the inbound queue: status bytes go straight to the
    /// charge controller; everything else accumulates into the line
    /// buffer until a terminator completes a response.
    pub fn process_rx(
        &mut self,
        charging: bool,
        charger: &mut dyn Charger,
        bus: &mut dyn DataBus,
        faults: &mut dyn FaultLine,
    ) {
        while let Some(ch) = self.rx.dequeue() {
            if ch >= protocol::STATUS_FLAG {
                self.controller.on_status(ch, charging, charger);
            } else {
                if self.line.len() >= self.config.line_buffer_size {
                    // Never silently truncate: fault and drop the
                    // partial line so the next response can frame.
                    faults.raise(Fault::QueueOverflow);
                    self.line.clear();
                    break;
                }
                self.line.push(ch);
                if ch == protocol::TERMINATOR {
                    self.process_line(charger, bus, faults);
                    break;
                }
            }
        }
    }

    /// Handles one complete response line.
    fn process_line(
        &mut self,
        charger: &mut dyn Charger,
        bus: &mut dyn DataBus,
        faults: &mut dyn FaultLine,
    ) {
        let line = std::mem::take(&mut self.line);

        if charger.end_of_charge() {
            self.restore_line(line);
            return;
        }

        if self.config.checksum_mode && !protocol::verify_checksum(&line) {
            // Drop the line; no resend from this path. The ack timer
            // recovers the exchange if this was the awaited reply.
            faults.raise(Fault::ChecksumMismatch);
            self.restore_line(line);
            return;
        }

        if let Some(reply) = protocol::parse_voltage_reply(&line) {
            if reply.cell == self.cell {
                // A matching reply doubles as the acknowledgment.
                self.awaiting_ack = false;
                if reply.millivolts < self.min_mv {
                    self.min_mv = reply.millivolts;
                    self.min_id = reply.cell;
                }
                if reply.millivolts > self.max_mv {
                    self.max_mv = reply.millivolts;
                    self.max_id = reply.cell;
                }
                if reply.cell == self.config.cell_count {
                    // Last cell of the poll cycle: the extrema are
                    // complete, publish them before advancing.
                    bus.transmit(
                        protocol::TELEMETRY_ID,
                        [self.min_mv, self.max_mv, self.min_id, self.max_id],
                    );
                }
                if self.cell >= self.config.cell_count {
                    self.cell = 1;
                } else {
                    self.cell += 1;
                    self.restore_line(line);
                    self.send_voltage_request(faults);
                    return;
                }
            }
            // A reply for any other cell is stale or duplicated and
            // is dropped without a fault.
        }
        self.restore_line(line);
    }

    // Hands the (cleared) allocation back to the line buffer.
    fn restore_line(&mut self, mut line: Vec<u8>) {
        line.clear();
        self.line = line;
    }

    /// Fixed-rate timer work: the ack/retry countdown and the
    /// poll-cycle restart countdown, which run independently.
    pub fn on_tick(&mut self, faults: &mut dyn FaultLine) {
        if self.awaiting_ack {
            self.ack_countdown = self.ack_countdown.saturating_sub(1);
            if self.ack_countdown == 0 {
                // Fault, then resend the same bytes; this repeats
                // every timeout until a matching reply arrives.
                faults.raise(Fault::AckTimeout);
                self.resend_last_frame(faults);
            }
        }

        self.poll_countdown = self.poll_countdown.saturating_sub(1);
        if self.poll_countdown == 0 {
            self.poll_countdown = self.config.poll_interval_ticks;
            self.min_mv = MIN_MV_RESET;
            self.max_mv = 0;
            self.min_id = 0;
            self.max_id = 0;
            self.cell = 1;
            self.send_voltage_request(faults);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChargeConfig;
    use crate::protocol::{STATUS_FLAG, STRESS_TABLE, TELEMETRY_ID};

    #[derive(Default)]
    struct TestCharger {
        eoc: bool,
        last_current: u16,
        requests: usize,
    }

    impl Charger for TestCharger {
        fn send_request(&mut self, _voltage: u16, current: u16, _off: bool) {
            self.last_current = current;
            self.requests += 1;
        }

        fn shutdown(&mut self) {
            self.eoc = true;
        }

        fn end_of_charge(&self) -> bool {
            self.eoc
        }

        fn last_current(&self) -> u16 {
            self.last_current
        }
    }

    #[derive(Default)]
    struct TestBus {
        frames: Vec<(u16, [u16; 4])>,
    }

    impl DataBus for TestBus {
        fn transmit(&mut self, identifier: u16, payload: [u16; 4]) {
            self.frames.push((identifier, payload));
        }
    }

    #[derive(Default)]
    struct TestFaults {
        raised: Vec<Fault>,
    }

    impl FaultLine for TestFaults {
        fn raise(&mut self, fault: Fault) {
            self.raised.push(fault);
        }
    }

    fn test_config() -> BmsConfig {
        BmsConfig {
            cell_count: 3,
            checksum_mode: false,
            ack_timeout_ticks: 10,
            poll_interval_ticks: 100_000,
            charge: ChargeConfig::default(),
            ..BmsConfig::default()
        }
    }

    fn drain_tx(bms: &mut Bms) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = bms.next_tx_byte() {
            out.push(b);
        }
        out
    }

    fn feed(bms: &mut Bms, bytes: &[u8]) {
        for &b in bytes {
            bms.receive_byte(b).unwrap();
        }
    }

    #[test]
    fn init_sends_handshake_and_first_request() {
        let mut bms = Bms::new(test_config());
        let mut faults = TestFaults::default();
        bms.init(&mut faults);
        assert_eq!(drain_tx(&mut bms), b"kk\r0K\r1sv\r");
        assert!(bms.awaiting_ack());
        assert!(faults.raised.is_empty());
    }

    #[test]
    fn init_with_checksum_sends_raw_toggle() {
        let mut bms = Bms::new(BmsConfig {
            checksum_mode: true,
            ..test_config()
        });
        let mut faults = TestFaults::default();
        bms.init(&mut faults);
        let tx = drain_tx(&mut bms);
        // The toggle goes out unframed; everything after carries a
        // checksum byte before its terminator.
        assert!(tx.starts_with(b"k\r"));
        assert!(protocol::verify_checksum(&tx[2..]));
    }

    #[test]
    fn three_cell_cycle_emits_telemetry_and_wraps() {
        let mut bms = Bms::new(test_config());
        let mut charger = TestCharger::default();
        let mut bus = TestBus::default();
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        drain_tx(&mut bms);

        feed(&mut bms, b"\\001:3500 V\r");
        bms.process_rx(false, &mut charger, &mut bus, &mut faults);
        assert_eq!(bms.current_cell(), 2);
        assert_eq!(drain_tx(&mut bms), b"2sv\r");
        assert!(bms.awaiting_ack());

        feed(&mut bms, b"\\002:3400 V\r");
        bms.process_rx(false, &mut charger, &mut bus, &mut faults);
        assert_eq!(bms.current_cell(), 3);
        assert_eq!(drain_tx(&mut bms), b"3sv\r");

        assert!(bus.frames.is_empty());
        feed(&mut bms, b"\\003:3600 V\r");
        bms.process_rx(false, &mut charger, &mut bus, &mut faults);

        // Telemetry fires exactly once, on the last cell's reply.
        assert_eq!(bus.frames, vec![(TELEMETRY_ID, [3400, 3600, 2, 3])]);
        // The sequencer wraps without starting a new request; the
        // next cycle waits for the poll countdown.
        assert_eq!(bms.current_cell(), 1);
        assert!(drain_tx(&mut bms).is_empty());
        assert!(!bms.awaiting_ack());
        assert!(faults.raised.is_empty());
    }

    #[test]
    fn ties_keep_the_first_holder() {
        let mut bms = Bms::new(test_config());
        let mut charger = TestCharger::default();
        let mut bus = TestBus::default();
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        for line in [b"\\001:3500 V\r", b"\\002:3500 V\r", b"\\003:3500 V\r"] {
            feed(&mut bms, line);
            bms.process_rx(false, &mut charger, &mut bus, &mut faults);
        }
        assert_eq!(bus.frames, vec![(TELEMETRY_ID, [3500, 3500, 1, 1])]);
    }

    #[test]
    fn stale_reply_is_silently_ignored() {
        let mut bms = Bms::new(test_config());
        let mut charger = TestCharger::default();
        let mut bus = TestBus::default();
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        drain_tx(&mut bms);

        feed(&mut bms, b"\\002:3400 V\r");
        bms.process_rx(false, &mut charger, &mut bus, &mut faults);
        // Still awaiting cell 1; nothing advanced, nothing faulted.
        assert!(bms.awaiting_ack());
        assert_eq!(bms.current_cell(), 1);
        assert!(drain_tx(&mut bms).is_empty());
        assert!(faults.raised.is_empty());
    }

    #[test]
    fn retry_fires_one_fault_and_one_resend_per_timeout() {
        let mut bms = Bms::new(test_config());
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        drain_tx(&mut bms);

        for _ in 0..9 {
            bms.on_tick(&mut faults);
        }
        assert!(faults.raised.is_empty());
        assert_eq!(bms.tx_pending(), 0);

        bms.on_tick(&mut faults);
        assert_eq!(faults.raised, vec![Fault::AckTimeout]);
        assert_eq!(drain_tx(&mut bms), b"1sv\r");

        // And again for the next elapsed timeout, indefinitely.
        for _ in 0..10 {
            bms.on_tick(&mut faults);
        }
        assert_eq!(faults.raised, vec![Fault::AckTimeout, Fault::AckTimeout]);
        assert_eq!(drain_tx(&mut bms), b"1sv\r");
    }

    #[test]
    fn matching_reply_stops_the_retry_loop() {
        let mut bms = Bms::new(test_config());
        let mut charger = TestCharger::default();
        let mut bus = TestBus::default();
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        drain_tx(&mut bms);
        feed(&mut bms, b"\\001:3500 V\r");
        bms.process_rx(false, &mut charger, &mut bus, &mut faults);
        drain_tx(&mut bms);

        // The ack now tracks the cell-2 request: after a full quiet
        // timeout only that frame is resent, once.
        for _ in 0..10 {
            bms.on_tick(&mut faults);
        }
        assert_eq!(faults.raised, vec![Fault::AckTimeout]);
        assert_eq!(drain_tx(&mut bms), b"2sv\r");
    }

    #[test]
    fn poll_countdown_restarts_the_cycle() {
        let mut bms = Bms::new(BmsConfig {
            poll_interval_ticks: 5,
            ..test_config()
        });
        let mut faults = TestFaults::default();

        for _ in 0..5 {
            bms.on_tick(&mut faults);
        }
        assert_eq!(bms.current_cell(), 1);
        assert_eq!(drain_tx(&mut bms), b"1sv\r");
        assert!(bms.awaiting_ack());

        // Countdown re-arms for the next cycle.
        for _ in 0..4 {
            bms.on_tick(&mut faults);
        }
        assert_eq!(bms.tx_pending(), 0);
    }

    #[test]
    fn checksum_mismatch_faults_and_drops_the_line() {
        let mut bms = Bms::new(BmsConfig {
            checksum_mode: true,
            ..test_config()
        });
        let mut charger = TestCharger::default();
        let mut bus = TestBus::default();
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        drain_tx(&mut bms);

        // Valid shape but a garbage checksum byte.
        feed(&mut bms, b"\\001:3500 VX\r");
        bms.process_rx(false, &mut charger, &mut bus, &mut faults);
        assert_eq!(faults.raised, vec![Fault::ChecksumMismatch]);
        // No resend from this path; the sequencer did not move.
        assert_eq!(bms.tx_pending(), 0);
        assert!(bms.awaiting_ack());
        assert_eq!(bms.current_cell(), 1);
    }

    #[test]
    fn overlong_line_faults_and_recovers() {
        let mut bms = Bms::new(test_config());
        let mut charger = TestCharger::default();
        let mut bus = TestBus::default();
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        drain_tx(&mut bms);

        // One byte more than the line buffer holds, no terminator.
        feed(&mut bms, &[b'x'; 17]);
        bms.process_rx(false, &mut charger, &mut bus, &mut faults);
        assert_eq!(faults.raised, vec![Fault::QueueOverflow]);

        // The dropped line does not poison the next response.
        faults.raised.clear();
        feed(&mut bms, b"\\001:3500 V\r");
        bms.process_rx(false, &mut charger, &mut bus, &mut faults);
        assert_eq!(bms.current_cell(), 2);
        assert!(faults.raised.is_empty());
    }

    #[test]
    fn status_bytes_bypass_line_framing() {
        let mut bms = Bms::new(test_config());
        let mut charger = TestCharger::default();
        let mut bus = TestBus::default();
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        feed(&mut bms, &[STATUS_FLAG | STRESS_TABLE[3]]);
        bms.process_rx(true, &mut charger, &mut bus, &mut faults);
        // The controller saw the sample and commanded the charger.
        assert_eq!(charger.requests, 1);

        // Interleaved with line data, framing is undisturbed.
        feed(&mut bms, b"\\001:35");
        feed(&mut bms, &[STATUS_FLAG | STRESS_TABLE[4]]);
        feed(&mut bms, b"00 V\r");
        bms.process_rx(true, &mut charger, &mut bus, &mut faults);
        assert_eq!(charger.requests, 2);
        assert_eq!(bms.current_cell(), 2);
    }

    #[test]
    fn end_of_charge_ignores_lines() {
        let mut bms = Bms::new(test_config());
        let mut charger = TestCharger {
            eoc: true,
            ..Default::default()
        };
        let mut bus = TestBus::default();
        let mut faults = TestFaults::default();

        bms.init(&mut faults);
        drain_tx(&mut bms);
        feed(&mut bms, b"\\001:3500 V\r");
        bms.process_rx(true, &mut charger, &mut bus, &mut faults);
        assert_eq!(bms.current_cell(), 1);
        assert!(bms.awaiting_ack());
    }

    #[test]
    fn send_fails_outright_when_tx_space_is_short() {
        let mut bms = Bms::new(BmsConfig {
            tx_queue_size: 4,
            ..test_config()
        });
        let mut faults = TestFaults::default();
        bms.init(&mut faults);
        // "kk\r" fits; the status enable and voltage request do not.
        assert!(faults.raised.contains(&Fault::QueueOverflow));
        assert_eq!(drain_tx(&mut bms), b"kk\r");
    }
}
