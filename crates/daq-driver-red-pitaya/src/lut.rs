//! Lookup-table waveform synthesis
//!
//! The IQ bitstream plays DAC waveforms and mixes ADC inputs with IQ
//! references from 8192-sample lookup tables clocked at 8 ns. This module
//! builds those tables and packs them into the integer codes the SCPI
//! server expects.
//!
//! # Waveforms
//!
//! | kind     | parameters                                          |
//! |----------|-----------------------------------------------------|
//! | `SIN`    | frequency, amplitude, pulse_duration, delay         |
//! | `COS`    | frequency, amplitude, pulse_duration, delay         |
//! | `RAMSEY` | frequency, amplitude, pulse_duration, wait, delay   |
//! | `ECHO`   | frequency, amplitude, pulse_half, wait, delay       |
//! | `STEP`   | amplitude, pulse_duration, slope_time, delay        |
//!
//! Durations are in seconds, frequencies in Hz, amplitudes relative to DAC
//! full scale. Every table value is `amplitude * 8192 * shape(t)`.
//!
//! # Wire format
//!
//! Table values are truncated toward zero, multiplied by 4 and tagged with a
//! 2-bit trigger in the low bits, then joined with `", "`.

use crate::timing::{
    get_samples_from_sec, max_lut_duration, FULL_SCALE, LUT_DEPTH, SAMPLE_PERIOD,
};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building or addressing a lookup table.
///
/// All of them are raised before anything is written to the device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LutError {
    #[error("Unsupported waveform '{0}' (expected SIN, COS, RAMSEY, ECHO or STEP)")]
    UnsupportedWaveform(String),

    #[error("{kind} LUT expects {expected} parameters, got {got}")]
    InvalidParameters {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{kind} LUT: '{name}' must be a finite, non-negative duration (got {value})")]
    InvalidDuration {
        kind: &'static str,
        name: &'static str,
        value: f64,
    },

    #[error("{kind} LUT: frequency {frequency} Hz exceeds the sample rate")]
    FrequencyTooHigh { kind: &'static str, frequency: f64 },

    #[error("{kind} LUT: amplitude {amplitude} outside [-1, 1]")]
    AmplitudeOutOfRange { kind: &'static str, amplitude: f64 },

    #[error("{kind} LUT: total duration {duration} s exceeds table depth ({max} s)")]
    DurationExceeded {
        kind: &'static str,
        duration: f64,
        max: f64,
    },

    #[error("{kind} LUT: {samples} samples exceed table depth of {max}")]
    TooManySamples {
        kind: &'static str,
        samples: usize,
        max: usize,
    },

    #[error("Wrong channel value '{0}' (expected CH1 or CH2)")]
    InvalidChannel(String),

    #[error("Wrong trigger value '{0}' (expected NONE, CH1, CH2 or BOTH)")]
    InvalidTrigger(String),

    #[error("Wrong quadrature value '{0}' (expected I or Q)")]
    InvalidQuadrature(String),
}

// =============================================================================
// Addressing
// =============================================================================

/// DAC / ADC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ch1,
    Ch2,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Ch1, Channel::Ch2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Ch1 => "CH1",
            Channel::Ch2 => "CH2",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = LutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CH1" => Ok(Channel::Ch1),
            "CH2" => Ok(Channel::Ch2),
            other => Err(LutError::InvalidChannel(other.to_string())),
        }
    }
}

/// Trigger tag packed into the two low bits of every DAC code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Trigger {
    #[default]
    None,
    Ch1,
    Ch2,
    Both,
}

impl Trigger {
    /// Value of the two low bits.
    pub fn bits(&self) -> i64 {
        match self {
            Trigger::None => 0,
            Trigger::Ch1 => 1,
            Trigger::Ch2 => 2,
            Trigger::Both => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::None => "NONE",
            Trigger::Ch1 => "CH1",
            Trigger::Ch2 => "CH2",
            Trigger::Both => "BOTH",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = LutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Trigger::None),
            "CH1" => Ok(Trigger::Ch1),
            "CH2" => Ok(Trigger::Ch2),
            "BOTH" => Ok(Trigger::Both),
            other => Err(LutError::InvalidTrigger(other.to_string())),
        }
    }
}

/// IQ reference quadrature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrature {
    I,
    Q,
}

impl Quadrature {
    pub const ALL: [Quadrature; 2] = [Quadrature::I, Quadrature::Q];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quadrature::I => "I",
            Quadrature::Q => "Q",
        }
    }
}

impl fmt::Display for Quadrature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quadrature {
    type Err = LutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I" => Ok(Quadrature::I),
            "Q" => Ok(Quadrature::Q),
            other => Err(LutError::InvalidQuadrature(other.to_string())),
        }
    }
}

// =============================================================================
// Waveform
// =============================================================================

/// A waveform request, validated before synthesis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    Sin {
        frequency: f64,
        amplitude: f64,
        pulse_duration: f64,
        delay: f64,
    },
    Cos {
        frequency: f64,
        amplitude: f64,
        pulse_duration: f64,
        delay: f64,
    },
    /// Two identical excitation pulses separated by a free-evolution wait.
    Ramsey {
        frequency: f64,
        amplitude: f64,
        pulse_duration: f64,
        wait: f64,
        delay: f64,
    },
    /// Half pulse, wait, full pulse, wait, half pulse.
    Echo {
        frequency: f64,
        amplitude: f64,
        pulse_half: f64,
        wait: f64,
        delay: f64,
    },
    /// Trapezoid: linear ramp up, plateau, mirrored ramp down.
    Step {
        amplitude: f64,
        pulse_duration: f64,
        slope_time: f64,
        delay: f64,
    },
}

impl Waveform {
    /// Build a waveform from its kind name and positional parameters.
    ///
    /// The kind is matched case-insensitively.
    pub fn from_kind(kind: &str, params: &[f64]) -> Result<Self, LutError> {
        let upper = kind.to_ascii_uppercase();
        let expect = |kind: &'static str, expected: usize| {
            if params.len() == expected {
                Ok(())
            } else {
                Err(LutError::InvalidParameters {
                    kind,
                    expected,
                    got: params.len(),
                })
            }
        };

        match upper.as_str() {
            "SIN" => {
                expect("SIN", 4)?;
                Ok(Waveform::Sin {
                    frequency: params[0],
                    amplitude: params[1],
                    pulse_duration: params[2],
                    delay: params[3],
                })
            }
            "COS" => {
                expect("COS", 4)?;
                Ok(Waveform::Cos {
                    frequency: params[0],
                    amplitude: params[1],
                    pulse_duration: params[2],
                    delay: params[3],
                })
            }
            "RAMSEY" => {
                expect("RAMSEY", 5)?;
                Ok(Waveform::Ramsey {
                    frequency: params[0],
                    amplitude: params[1],
                    pulse_duration: params[2],
                    wait: params[3],
                    delay: params[4],
                })
            }
            "ECHO" => {
                expect("ECHO", 5)?;
                Ok(Waveform::Echo {
                    frequency: params[0],
                    amplitude: params[1],
                    pulse_half: params[2],
                    wait: params[3],
                    delay: params[4],
                })
            }
            "STEP" => {
                expect("STEP", 4)?;
                Ok(Waveform::Step {
                    amplitude: params[0],
                    pulse_duration: params[1],
                    slope_time: params[2],
                    delay: params[3],
                })
            }
            _ => Err(LutError::UnsupportedWaveform(kind.to_string())),
        }
    }

    /// Kind name as used on the command line and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Waveform::Sin { .. } => "SIN",
            Waveform::Cos { .. } => "COS",
            Waveform::Ramsey { .. } => "RAMSEY",
            Waveform::Echo { .. } => "ECHO",
            Waveform::Step { .. } => "STEP",
        }
    }

    /// Sum of all segments, in seconds.
    pub fn total_duration(&self) -> f64 {
        match *self {
            Waveform::Sin {
                pulse_duration,
                delay,
                ..
            }
            | Waveform::Cos {
                pulse_duration,
                delay,
                ..
            } => pulse_duration + delay,
            Waveform::Ramsey {
                pulse_duration,
                wait,
                delay,
                ..
            } => 2.0 * pulse_duration + delay + wait,
            Waveform::Echo {
                pulse_half,
                wait,
                delay,
                ..
            } => 4.0 * pulse_half + delay + 2.0 * wait,
            Waveform::Step {
                pulse_duration,
                slope_time,
                delay,
                ..
            } => pulse_duration + delay + 2.0 * slope_time,
        }
    }

    fn amplitude(&self) -> f64 {
        match *self {
            Waveform::Sin { amplitude, .. }
            | Waveform::Cos { amplitude, .. }
            | Waveform::Ramsey { amplitude, .. }
            | Waveform::Echo { amplitude, .. }
            | Waveform::Step { amplitude, .. } => amplitude,
        }
    }

    fn frequency(&self) -> Option<f64> {
        match *self {
            Waveform::Sin { frequency, .. }
            | Waveform::Cos { frequency, .. }
            | Waveform::Ramsey { frequency, .. }
            | Waveform::Echo { frequency, .. } => Some(frequency),
            Waveform::Step { .. } => None,
        }
    }

    fn durations(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Waveform::Sin {
                pulse_duration,
                delay,
                ..
            }
            | Waveform::Cos {
                pulse_duration,
                delay,
                ..
            } => vec![("pulse_duration", pulse_duration), ("delay", delay)],
            Waveform::Ramsey {
                pulse_duration,
                wait,
                delay,
                ..
            } => vec![
                ("pulse_duration", pulse_duration),
                ("wait", wait),
                ("delay", delay),
            ],
            Waveform::Echo {
                pulse_half,
                wait,
                delay,
                ..
            } => vec![("pulse_half", pulse_half), ("wait", wait), ("delay", delay)],
            Waveform::Step {
                pulse_duration,
                slope_time,
                delay,
                ..
            } => vec![
                ("pulse_duration", pulse_duration),
                ("slope_time", slope_time),
                ("delay", delay),
            ],
        }
    }

    /// Check the request against the hardware limits.
    pub fn validate(&self) -> Result<(), LutError> {
        let kind = self.kind();

        for (name, value) in self.durations() {
            if !value.is_finite() || value < 0.0 {
                return Err(LutError::InvalidDuration { kind, name, value });
            }
        }

        if let Some(frequency) = self.frequency() {
            if !frequency.is_finite() || frequency > 1.0 / SAMPLE_PERIOD {
                return Err(LutError::FrequencyTooHigh { kind, frequency });
            }
        }

        let amplitude = self.amplitude();
        if !amplitude.is_finite() || amplitude.abs() > 1.0 {
            return Err(LutError::AmplitudeOutOfRange { kind, amplitude });
        }

        let duration = self.total_duration();
        if duration > max_lut_duration() {
            return Err(LutError::DurationExceeded {
                kind,
                duration,
                max: max_lut_duration(),
            });
        }

        Ok(())
    }

    /// Synthesize the table.
    pub fn synthesize(&self) -> Result<Vec<f64>, LutError> {
        self.validate()?;

        let mut shape = match *self {
            Waveform::Sin {
                frequency,
                pulse_duration,
                delay,
                ..
            } => {
                let mut table = zeros(rounded_samples(delay));
                table.extend(oscillation(
                    frequency * pulse_duration,
                    rounded_samples(pulse_duration),
                    f64::sin,
                ));
                table
            }
            Waveform::Cos {
                frequency,
                pulse_duration,
                delay,
                ..
            } => {
                let mut table = zeros(rounded_samples(delay));
                table.extend(oscillation(
                    frequency * pulse_duration,
                    rounded_samples(pulse_duration),
                    f64::cos,
                ));
                table
            }
            Waveform::Ramsey {
                frequency,
                pulse_duration,
                wait,
                delay,
                ..
            } => {
                let excitation = oscillation(
                    frequency * pulse_duration,
                    rounded_samples(pulse_duration),
                    f64::sin,
                );
                let mut table = zeros(rounded_samples(delay));
                table.extend_from_slice(&excitation);
                table.extend(zeros(rounded_samples(wait)));
                table.extend_from_slice(&excitation);
                table
            }
            Waveform::Echo {
                frequency,
                pulse_half,
                wait,
                delay,
                ..
            } => {
                let n_half = rounded_samples(pulse_half);
                let cycles_half = frequency * pulse_half;
                let half = oscillation(cycles_half, n_half, f64::sin);
                let full = oscillation(2.0 * cycles_half, 2 * n_half, f64::sin);
                let wait_samples = rounded_samples(wait);

                let mut table = zeros(rounded_samples(delay));
                table.extend_from_slice(&half);
                table.extend(zeros(wait_samples));
                table.extend(full);
                table.extend(zeros(wait_samples));
                table.extend_from_slice(&half);
                table
            }
            Waveform::Step {
                pulse_duration,
                slope_time,
                delay,
                ..
            } => {
                // STEP segments truncate instead of rounding
                let ramp = linspace(0.0, 1.0, truncated_samples(slope_time));
                let mut table = zeros(truncated_samples(delay));
                table.extend_from_slice(&ramp);
                table.extend(std::iter::repeat(1.0).take(truncated_samples(pulse_duration)));
                table.extend(ramp.iter().rev());
                table
            }
        };

        if shape.len() > LUT_DEPTH {
            return Err(LutError::TooManySamples {
                kind: self.kind(),
                samples: shape.len(),
                max: LUT_DEPTH,
            });
        }

        let scale = self.amplitude() * FULL_SCALE;
        for value in shape.iter_mut() {
            *value *= scale;
        }
        Ok(shape)
    }
}

/// Build the lookup table for `kind` with positional `params`.
///
/// ```rust
/// use daq_driver_red_pitaya::lut::fill_lut;
///
/// let table = fill_lut("STEP", &[1.0, 80e-9, 16e-9, 8e-9]).unwrap();
/// assert_eq!(table.len(), 15);
/// ```
pub fn fill_lut(kind: &str, params: &[f64]) -> Result<Vec<f64>, LutError> {
    Waveform::from_kind(kind, params)?.synthesize()
}

/// Pack a table into DAC codes: `trunc(v) * 4 + trigger`.
pub fn pack_dac_codes(table: &[f64], trigger: Trigger) -> Vec<i64> {
    table
        .iter()
        .map(|v| (v.trunc() as i64) * 4 + trigger.bits())
        .collect()
}

/// Pack a table into IQ reference codes: `trunc(v) * 4`.
pub fn pack_iq_codes(table: &[f64]) -> Vec<i64> {
    pack_dac_codes(table, Trigger::None)
}

/// Render codes the way the SCPI server parses them.
pub fn format_codes(codes: &[i64]) -> String {
    codes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Helpers
// =============================================================================

fn rounded_samples(sec: f64) -> usize {
    get_samples_from_sec(sec).max(0) as usize
}

fn truncated_samples(sec: f64) -> usize {
    (sec / SAMPLE_PERIOD).trunc().max(0.0) as usize
}

fn zeros(n: usize) -> Vec<f64> {
    vec![0.0; n]
}

/// `n` evenly spaced points from `start` to `stop`, both included.
pub(crate) fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        stop
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// `cycles` periods of `shape` sampled on `n` points over `[0, 2π]`.
fn oscillation(cycles: f64, n: usize, shape: fn(f64) -> f64) -> Vec<f64> {
    linspace(0.0, 2.0 * PI, n)
        .into_iter()
        .map(|t| shape(cycles * t))
        .collect()
}
