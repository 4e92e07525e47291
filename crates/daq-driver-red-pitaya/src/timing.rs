//! Sample clock of the IQ FPGA design and the fixed settling delays the
//! SCPI server needs between commands.

use std::time::Duration;

/// ADC/DAC sample period (125 MS/s).
pub const SAMPLE_PERIOD: f64 = 8e-9;

/// Depth of every DAC and IQ lookup table, in samples.
pub const LUT_DEPTH: usize = 8192;

/// DAC full scale (14-bit signed).
pub const FULL_SCALE: f64 = 8192.0;

/// Longest waveform a lookup table can hold, in seconds.
pub fn max_lut_duration() -> f64 {
    LUT_DEPTH as f64 * SAMPLE_PERIOD
}

/// Before a `start`/`stop` status command is written.
pub const STATUS_SETTLE: Duration = Duration::from_millis(200);
/// After `start`, before the first poll.
pub const START_SETTLE: Duration = Duration::from_millis(200);
/// Before an acquisition reads its configuration.
pub const ACQUIRE_SETTLE: Duration = Duration::from_millis(200);
/// Around the final `stop` of an acquisition.
pub const STOP_SETTLE: Duration = Duration::from_millis(100);
/// Before every derived view triggers an acquisition.
pub const VIEW_SETTLE: Duration = Duration::from_millis(200);
/// Every seconds/samples conversion that talks to the device.
pub const CONVERSION_SETTLE: Duration = Duration::from_millis(100);
/// Before a lookup table upload.
pub const LUT_SETTLE: Duration = Duration::from_millis(100);
/// Between `start` and the read of a single pulse.
pub const SINGLE_PULSE_SETTLE: Duration = Duration::from_millis(800);

/// Convert seconds to the nearest sample count (ties to even).
pub fn get_samples_from_sec(sec: f64) -> i64 {
    (sec / SAMPLE_PERIOD).round_ties_even() as i64
}

/// Convert a sample count to seconds.
pub fn get_sec_from_samples(samples: i64) -> f64 {
    samples as f64 * SAMPLE_PERIOD
}
