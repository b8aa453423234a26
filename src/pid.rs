//! Fixed-point PID controller for the charge-current loop.
//!
//! Gains are s7.8 fixed point; errors and outputs are s0.15-style
//! 16-bit signed fractions. No floating point is used anywhere on the
//! control path.

/// Fraction bits of the gain coefficients.
pub const GAIN_FRACTION_BITS: u32 = 8;
/// One in s7.8 fixed point.
pub const GAIN_ONE: i32 = 1 << GAIN_FRACTION_BITS;

// Integral accumulator saturation; keeps ki * integral inside i32
// after the >> 8 and the output clamp meaningful.
const INTEGRAL_LIMIT: i32 = 1 << 20;

/// PID state: gains, accumulated integral, previous error. The set
/// point is implicit; callers bias the raw measurement so that the
/// target reads as zero error.
#[derive(Debug, Clone)]
pub struct Pid {
    kp: i32,
    ki: i32,
    kd: i32,
    integral: i32,
    prev_error: i16,
}

impl Pid {
    /// Gains in s7.8 fixed point, e.g. `(3 * GAIN_ONE) / 2` for 1.5.
    pub fn new(kp: i32, ki: i32, kd: i32, initial_error: i16) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0,
            prev_error: initial_error,
        }
    }

    /// One update with a fresh error sample. Returns the control
    /// output saturated to the i16 range.
    pub fn tick(&mut self, error: i16) -> i16 {
        let e = i32::from(error);
        self.integral = (self.integral + e).clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);
        let derivative = e - i32::from(self.prev_error);
        self.prev_error = error;

        let raw = (self.kp as i64 * e as i64
            + self.ki as i64 * self.integral as i64
            + self.kd as i64 * derivative as i64)
            >> GAIN_FRACTION_BITS;
        raw.clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }

    /// One update with no new sample: repeats the previous error (a
    /// dummy measurement), so the derivative term stays continuous
    /// across a corrupted sample instead of seeing a false step.
    pub fn tick_held(&mut self) -> i16 {
        let held = self.prev_error;
        self.tick(held)
    }

    /// Last error fed to the controller.
    pub fn prev_error(&self) -> i16 {
        self.prev_error
    }
}
