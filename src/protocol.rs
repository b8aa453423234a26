//! Wire protocol for the cell-monitor chain.
//!
//! Command frames are ASCII terminated by a carriage return, with an
//! optional XOR checksum byte inserted immediately before the
//! terminator. Cell monitors answer with voltage-reply lines and with
//! single status bytes (high bit set) that travel outside line framing.

use serde::{Deserialize, Serialize};

/// Terminator closing every command frame and reply line.
pub const TERMINATOR: u8 = b'\r';
/// First byte of a voltage-reply line.
pub const REPLY_MARKER: u8 = b'\\';
/// Unit marker at byte 10 of a voltage-reply line.
pub const VOLT_MARKER: u8 = b'V';
/// Bytes with this bit set are compact status frames, not line data.
pub const STATUS_FLAG: u8 = 0x80;
/// Low three bits of a status byte: the stress value.
pub const STRESS_MASK: u8 = 0x07;
/// Low five bits: stress plus two check bits.
pub const ENCODED_MASK: u8 = 0x1f;
/// Bit 5 of a status byte: every cell monitor is bypassing.
pub const ALL_BYPASS: u8 = 0x20;

/// Checksum-mode toggle command. Sent raw (unframed) when enabling:
/// a framed packet would carry its own checksum and toggle twice.
pub const CHECKSUM_TOGGLE: &[u8] = b"k\r";
/// Double toggle, framed; leaves checksumming off whatever it was.
pub const CHECKSUM_OFF: &[u8] = b"kk\r";
/// Enables status-output ("badness sending") in the cell monitors.
pub const STATUS_ENABLE: &[u8] = b"0K\r";
/// Command suffix requesting a voltage reading: select, then voltage.
pub const VOLT_SUFFIX: &[u8] = b"sv";

/// Data-bus identifier for the min/max telemetry event.
pub const TELEMETRY_ID: u16 = 0x266;

/// Stress values with their redundant check bits, indexed by stress.
/// An exact-match lookup: error detecting, not correcting.
pub const STRESS_TABLE: [u8; 8] = [
    (1 << 3) + 0, // Stress 0   $08
    (3 << 3) + 1, // Stress 1   $19
    (3 << 3) + 2, // Stress 2   $1A
    (1 << 3) + 3, // Stress 3   $0B
    (2 << 3) + 4, // Stress 4   $14
    (0 << 3) + 5, // Stress 5   $05
    (0 << 3) + 6, // Stress 6   $06
    (2 << 3) + 7, // Stress 7   $17
];

/// Builds the on-wire form of `command`, which must end with the
/// terminator. With checksum mode enabled, the XOR of all bytes before
/// the terminator is inserted in front of it; a checksum that lands on
/// a control character gets a space emitted first and the checksum
/// updated, so receivers never see a structural control byte there.
pub fn encode_frame(command: &[u8], checksum_mode: bool) -> Vec<u8> {
    debug_assert_eq!(command.last(), Some(&TERMINATOR));
    if !checksum_mode {
        return command.to_vec();
    }
    let mut frame = Vec::with_capacity(command.len() + 2);
    let mut sum: u8 = 0;
    for &ch in command {
        if ch == TERMINATOR {
            break;
        }
        sum ^= ch;
        frame.push(ch);
    }
    if sum < b' ' {
        // A control-character checksum could be confused with a CR,
        // BS, etc. A space shifts it into the printable range.
        frame.push(b' ');
        sum ^= b' ';
    }
    frame.push(sum);
    frame.push(TERMINATOR);
    frame
}

/// Recomputes the XOR over all bytes before the terminator. A frame
/// built with a trailing checksum XORs to zero.
pub fn verify_checksum(line: &[u8]) -> bool {
    let mut sum: u8 = 0;
    for &ch in line {
        if ch == TERMINATOR {
            break;
        }
        sum ^= ch;
    }
    sum == 0
}

/// Formats the voltage-request command for one cell: the decimal id
/// with leading-zero suppression, then the select/voltage suffix.
pub fn make_volt_command(cell: u16) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(8);
    let hundreds = cell / 100;
    let tens = (cell / 10) % 10;
    if hundreds != 0 {
        cmd.push(b'0' + hundreds as u8);
    }
    if hundreds != 0 || tens != 0 {
        cmd.push(b'0' + tens as u8);
    }
    cmd.push(b'0' + (cell % 10) as u8);
    cmd.extend_from_slice(VOLT_SUFFIX);
    cmd.push(TERMINATOR);
    cmd
}

/// One parsed voltage-reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoltageReply {
    pub cell: u16,
    /// Cell voltage in millivolts.
    pub millivolts: u16,
}

/// Attempts to match the voltage-reply shape
/// `\<3-digit-id>:<4-digit-mV> V<CR>` (id at bytes 1-3, voltage at
/// bytes 5-8). Any non-matching line yields `None` and is ignored
/// without error.
pub fn parse_voltage_reply(line: &[u8]) -> Option<VoltageReply> {
    if line.len() < 11 {
        return None;
    }
    if line[0] != REPLY_MARKER || line[4] != b':' || line[10] != VOLT_MARKER {
        return None;
    }
    let digit = |i: usize| (line[i].wrapping_sub(b'0')) as u16;
    let cell = 100 * digit(1) + 10 * digit(2) + digit(3);
    let mut millivolts = 100 * digit(5) + 10 * digit(6) + digit(7);
    // Fold in the fourth digit to get the whole 4-digit number.
    millivolts = millivolts * 10 + digit(8);
    Some(VoltageReply { cell, millivolts })
}

/// A decoded compact status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    /// Charge-balance deviation, 0-7.
    pub stress: u8,
    /// Check bits matched the stress table entry exactly.
    pub valid: bool,
    /// Every cell monitor is shunting current around its cell.
    pub all_bypass: bool,
}

/// Decodes a single status byte. The low three bits carry the stress
/// value; the low five must equal the table entry for that stress.
pub fn decode_status(byte: u8) -> StatusFrame {
    let stress = byte & STRESS_MASK;
    let encoded = byte & ENCODED_MASK;
    StatusFrame {
        stress,
        valid: STRESS_TABLE[stress as usize] == encoded,
        all_bypass: byte & ALL_BYPASS != 0,
    }
}

/// Formats the charger's measured total voltage (tenths of a volt) and
/// current (tenths of an amp) as a comment frame on the cell-monitor
/// channel: `\CHG nnnV n.nA<CR>`. Debugging aid.
pub fn make_charger_comment(volts: u16, amps: u16) -> Vec<u8> {
    let mut cmd = b"\\CHG nnnV n.nA\r".to_vec();
    cmd[5] = b'0' + (volts / 1000 % 10) as u8;
    cmd[6] = b'0' + (volts / 100 % 10) as u8;
    cmd[7] = b'0' + (volts / 10 % 10) as u8;
    cmd[10] = b'0' + (amps / 10 % 10) as u8;
    cmd[12] = b'0' + (amps % 10) as u8;
    cmd
}
