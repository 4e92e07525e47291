//! Read-only views derived from one acquisition.
//!
//! Every view triggers a full [`get_data`](crate::RedPitayaDriver::get_data)
//! and picks, averages or combines channels of the result. Which channels
//! exist depends on the output mode the board is in; asking for a channel
//! the mode does not produce is an [`AcquisitionError::ChannelUnavailable`].

use crate::acquisition::{AcquisitionError, Traces};
use crate::lut::linspace;
use crate::timing::VIEW_SETTLE;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Load impedance used for `ADC_power`, in ohms.
pub const LOAD_IMPEDANCE: f64 = 50.0;

/// Named derived view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Adc1,
    Adc2,
    I1,
    Q1,
    I2,
    Q2,
    I1Int,
    Q1Int,
    I2Int,
    Q2Int,
    IqIntAll,
    I1IntAvg,
    Q1IntAvg,
    I2IntAvg,
    Q2IntAvg,
    IqIntAvgAll,
    AdcPower,
}

impl View {
    pub const ALL: [View; 17] = [
        View::Adc1,
        View::Adc2,
        View::I1,
        View::Q1,
        View::I2,
        View::Q2,
        View::I1Int,
        View::Q1Int,
        View::I2Int,
        View::Q2Int,
        View::IqIntAll,
        View::I1IntAvg,
        View::Q1IntAvg,
        View::I2IntAvg,
        View::Q2IntAvg,
        View::IqIntAvgAll,
        View::AdcPower,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            View::Adc1 => "ADC1",
            View::Adc2 => "ADC2",
            View::I1 => "I1",
            View::Q1 => "Q1",
            View::I2 => "I2",
            View::Q2 => "Q2",
            View::I1Int => "I1_INT",
            View::Q1Int => "Q1_INT",
            View::I2Int => "I2_INT",
            View::Q2Int => "Q2_INT",
            View::IqIntAll => "IQ_INT_all",
            View::I1IntAvg => "I1_INT_AVG",
            View::Q1IntAvg => "Q1_INT_AVG",
            View::I2IntAvg => "I2_INT_AVG",
            View::Q2IntAvg => "Q2_INT_AVG",
            View::IqIntAvgAll => "IQ_INT_AVG_all",
            View::AdcPower => "ADC_power",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            View::AdcPower => "W",
            View::IqIntAll | View::IqIntAvgAll => "",
            _ => "V",
        }
    }

    /// Delay before the acquisition. `IQ_INT_all` reads immediately.
    pub fn settle(&self) -> Option<Duration> {
        match self {
            View::IqIntAll => None,
            _ => Some(VIEW_SETTLE),
        }
    }

    /// Compute the view from acquired traces.
    pub fn compute(&self, traces: &Traces) -> Result<ViewValue, AcquisitionError> {
        let value = match self {
            // 2-way modes: stream channel 0/1 is CH1/CH2, I1/Q1 or I2/Q2
            View::Adc1 | View::I1 | View::I2 => ViewValue::Trace(traces.channel(0)?.to_vec()),
            View::Adc2 | View::Q1 | View::Q2 => ViewValue::Trace(traces.channel(1)?.to_vec()),

            View::I1Int => ViewValue::Trace(traces.channel(0)?.to_vec()),
            View::Q1Int => ViewValue::Trace(traces.channel(1)?.to_vec()),
            View::I2Int => ViewValue::Trace(traces.channel(2)?.to_vec()),
            View::Q2Int => ViewValue::Trace(traces.channel(3)?.to_vec()),

            View::IqIntAll => ViewValue::Matrix(transpose4(traces)?),

            View::I1IntAvg => ViewValue::Scalar(mean(traces.channel(0)?)),
            View::Q1IntAvg => ViewValue::Scalar(mean(traces.channel(1)?)),
            View::I2IntAvg => ViewValue::Scalar(mean(traces.channel(2)?)),
            View::Q2IntAvg => ViewValue::Scalar(mean(traces.channel(3)?)),

            View::IqIntAvgAll => ViewValue::Vector(
                (0..4)
                    .map(|i| traces.channel(i).map(mean))
                    .collect::<Result<_, _>>()?,
            ),

            View::AdcPower => ViewValue::Vector(vec![
                power(traces.channel(0)?, traces.channel(1)?),
                power(traces.channel(2)?, traces.channel(3)?),
            ]),
        };
        Ok(value)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        View::ALL
            .into_iter()
            .find(|v| v.name() == s.trim())
            .ok_or_else(|| format!("unknown view '{}'", s.trim()))
    }
}

/// Result of a view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewValue {
    /// One value per sample or per frame
    Trace(Vec<f64>),
    /// `nb_measure` rows of `[I1, Q1, I2, Q2]`
    Matrix(Vec<[f64; 4]>),
    /// Small fixed-size result (averages, powers)
    Vector(Vec<f64>),
    Scalar(f64),
}

// =============================================================================
// Setpoint axes
// =============================================================================

/// `linspace(start, stop - 1, num)`, the index axis a trace is plotted against.
pub fn setpoint_axis(start: f64, stop: f64, num: usize) -> Vec<f64> {
    linspace(start, stop - 1.0, num)
}

/// Axis of the two `ADC_power` entries: `[0, 1]`.
pub fn channel_axis() -> Vec<f64> {
    setpoint_axis(0.0, 2.0, 2)
}

// =============================================================================
// Reductions
// =============================================================================

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `mean(a² + b²) / 50`
fn power(a: &[f64], b: &[f64]) -> f64 {
    let squares: Vec<f64> = a.iter().zip(b).map(|(x, y)| x * x + y * y).collect();
    mean(&squares) / LOAD_IMPEDANCE
}

fn transpose4(traces: &Traces) -> Result<Vec<[f64; 4]>, AcquisitionError> {
    let (i1, q1, i2, q2) = (
        traces.channel(0)?,
        traces.channel(1)?,
        traces.channel(2)?,
        traces.channel(3)?,
    );
    Ok(i1
        .iter()
        .zip(q1)
        .zip(i2)
        .zip(q2)
        .map(|(((&i1, &q1), &i2), &q2)| [i1, q1, i2, q2])
        .collect())
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::acquisition::{demultiplex, OutputMode};

    fn iqint_traces() -> Traces {
        // two frames, N = 1, values 1..8 in units of 4 * 8192
        let signal: Vec<i32> = (1..=8).map(|v| v * 32768).collect();
        demultiplex(&signal, OutputMode::IqInt, 1)
    }

    #[test]
    fn names_round_trip() {
        for view in View::ALL {
            assert_eq!(view.name().parse::<View>().unwrap(), view);
        }
        assert!("I3".parse::<View>().is_err());
        assert_eq!(View::IqIntAll.settle(), None);
        assert_eq!(View::Adc1.settle(), Some(VIEW_SETTLE));
    }

    #[test]
    fn integrated_views_pick_lanes() {
        let traces = iqint_traces();
        assert_eq!(
            View::Q2Int.compute(&traces).unwrap(),
            ViewValue::Trace(vec![4.0, 8.0])
        );
        assert_eq!(
            View::I2IntAvg.compute(&traces).unwrap(),
            ViewValue::Scalar(5.0)
        );
        assert_eq!(
            View::IqIntAvgAll.compute(&traces).unwrap(),
            ViewValue::Vector(vec![3.0, 4.0, 5.0, 6.0])
        );
        assert_eq!(
            View::IqIntAll.compute(&traces).unwrap(),
            ViewValue::Matrix(vec![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]])
        );
    }

    #[test]
    fn adc_power_uses_fifty_ohms() {
        let traces = iqint_traces();
        // (1 + 4 + 25 + 36) / 2 / 50, (9 + 16 + 49 + 64) / 2 / 50
        assert_eq!(
            View::AdcPower.compute(&traces).unwrap(),
            ViewValue::Vector(vec![0.66, 1.38])
        );
    }

    #[test]
    fn two_way_mode_has_no_third_channel() {
        let signal: Vec<i32> = vec![32768, 65536, 32768, 65536];
        let traces = demultiplex(&signal, OutputMode::IqCh2, 100);
        assert_eq!(
            View::I2.compute(&traces).unwrap(),
            ViewValue::Trace(vec![1.0, 1.0])
        );
        assert!(matches!(
            View::I2Int.compute(&traces),
            Err(AcquisitionError::ChannelUnavailable { index: 2, .. })
        ));
    }

    #[test]
    fn ragged_integrated_stream_reduces_without_panicking() {
        // five samples: one whole group of four plus a stray sample
        let signal: Vec<i32> = (1..=5).map(|v| v * 32768).collect();
        let traces = demultiplex(&signal, OutputMode::IqInt, 1);
        assert_eq!(
            View::IqIntAll.compute(&traces).unwrap(),
            ViewValue::Matrix(vec![[1.0, 2.0, 3.0, 4.0]])
        );
        assert!(matches!(
            View::AdcPower.compute(&traces).unwrap(),
            ViewValue::Vector(v) if v.len() == 2
        ));
    }

    #[test]
    fn axes() {
        assert_eq!(channel_axis(), vec![0.0, 1.0]);
        assert_eq!(setpoint_axis(0.0, 5.0, 5), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(setpoint_axis(0.0, 0.0, 0).is_empty());
    }
}
