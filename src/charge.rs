//! Closed-loop charge-current control driven by decoded status frames.

use crate::config::ChargeConfig;
use crate::pid::{Pid, GAIN_ONE};
use crate::protocol;

/// Charger collaborator. The charger's own outgoing protocol lives
/// elsewhere; this core only issues requests and reads back two facts.
pub trait Charger {
    /// Request a voltage/current operating point (units: tenths of a
    /// volt and tenths of an amp), or turn the output off.
    fn send_request(&mut self, voltage: u16, current: u16, off: bool);
    /// Terminate charging; latches the end-of-charge state.
    fn shutdown(&mut self);
    /// End-of-charge flag; once set, per-sample processing is a no-op.
    fn end_of_charge(&self) -> bool;
    /// Last current commanded from the charger, tenths of an amp.
    fn last_current(&self) -> u16;
}

/// Kp = 1.5 as s7.8 fixed point.
const KP: i32 = (3 * GAIN_ONE) / 2;
/// Ki = 1.0.
const KI: i32 = GAIN_ONE;
/// Kd = 0.3.
const KD: i32 = (3 * GAIN_ONE) / 10;

/// The target stress of 3.5 (of 0..8) scaled by 2^13, so that a
/// mid-scale measurement reads as zero error.
const STRESS_BIAS: i32 = 0x7000;

/// Converts stress feedback into charger current commands.
///
/// Owns the PID state and the bypass soak counter; the charger itself
/// stays an external collaborator passed into each call.
#[derive(Debug)]
pub struct ChargeController {
    config: ChargeConfig,
    pid: Pid,
    soak_count: u32,
}

impl ChargeController {
    pub fn new(config: ChargeConfig) -> Self {
        Self {
            config,
            pid: Pid::new(KP, KI, KD, 0),
            soak_count: 0,
        }
    }

    /// Ticks accumulated toward end-of-charge soak.
    pub fn soak_count(&self) -> u32 {
        self.soak_count
    }

    /// Processes one status byte from the chain. No-op unless charging
    /// and not yet at end-of-charge.
    pub fn on_status(&mut self, byte: u8, charging: bool, charger: &mut dyn Charger) {
        if !charging {
            // Driving: voltage polling still runs, but there is no
            // current loop to feed.
            return;
        }
        if charger.end_of_charge() {
            return;
        }

        let status = protocol::decode_status(byte);
        let output = if status.valid {
            // Scale stress 0-7 into an s0.15 fraction (<< 13), biased
            // so the 3.5 target reads as zero. Error runs opposite to
            // the measurement: stress above target pulls current down.
            let error = (STRESS_BIAS - (i32::from(status.stress) << 13)) as i16;
            let output = self.pid.tick(error);

            if status.all_bypass && charger.last_current() <= self.config.cutoff_current {
                self.soak_count += 1;
                if self.soak_count >= self.config.soak_ticks {
                    // Latches end-of-charge; the sample still falls
                    // through to one final current request below.
                    charger.shutdown();
                }
            } else {
                // Decay gives hysteresis against transient flicker of
                // the bypass bit; saturates at zero.
                self.soak_count = self.soak_count.saturating_sub(1);
            }
            output
        } else {
            // Corrupted sample: dummy measurement reusing the last
            // error keeps the derivative term continuous.
            self.pid.tick_held()
        };

        // Map output (-1.0 = zero current, +1.0 = maximum) onto
        // 0..current_limit with a double-width multiply and rounding.
        // 64-bit intermediate: 0xFFFF * current_limit can exceed i32.
        let current = ((i64::from(output) + 0x8000) * i64::from(self.config.current_limit)
            + 0x8000)
            >> 16;
        charger.send_request(self.config.voltage_limit, current as u16, false);
    }
}
