//! Instrument Capabilities
//!
//! Small capability traits that instrument drivers implement. Generic code
//! (the CLI, the registry) talks to devices only through these traits:
//!
//! - the microwave source implements: `Parameterized`
//! - the Red Pitaya implements: `Parameterized + TraceProducer + WaveformGenerator`
//! - the switch controller implements: `Parameterized + Routable`
//!
//! Each capability trait:
//! - Is async (uses #[async_trait]) where it touches hardware
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors

use crate::parameter::ParameterSet;
use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Device Category
// =============================================================================

/// Device category for classification in listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceCategory {
    /// Microwave and RF signal generators
    SignalSource,
    /// Acquisition boards and digitizers
    Digitizer,
    /// RF switches and routing hardware
    Switch,
    /// Devices that don't fit other categories
    #[default]
    Other,
}

impl DeviceCategory {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::SignalSource => "Signal Sources",
            Self::Digitizer => "Digitizers",
            Self::Switch => "Switches",
            Self::Other => "Other",
        }
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: Parameter Registry
///
/// Devices that expose their settings as named [`crate::parameter::Parameter`]s.
///
/// ```rust,ignore
/// fn list_all_parameters<D: Parameterized>(device: &D) {
///     for name in device.parameters().names() {
///         println!("Parameter: {}", name);
///     }
/// }
/// ```
pub trait Parameterized: Send + Sync {
    /// Get device's parameter registry
    fn parameters(&self) -> &ParameterSet;
}

/// Capability: Signal Routing
///
/// Devices that connect an input to one of several outputs (RF switches).
///
/// # Contract
/// - `switch` names one switch on the device (e.g. `rt`, `cryo`)
/// - `position` is the device-specific position label
/// - An unknown switch name is an error; an invalid position may be
///   reported without failing, depending on the device
#[async_trait]
pub trait Routable: Send + Sync {
    /// Move `switch` to `position`.
    async fn route(&self, switch: &str, position: &str) -> Result<()>;

    /// Names of the switches this device controls.
    fn switches(&self) -> &'static [&'static str];
}

/// Capability: Trace Acquisition
///
/// Devices that acquire one or more sampled traces per call.
///
/// # Contract
/// - `read_traces()` runs one complete acquisition and returns one vector
///   per output channel, already scaled to physical units
/// - The call blocks (asynchronously) until the acquisition finishes or
///   the driver's retry budget is exhausted
#[async_trait]
pub trait TraceProducer: Send + Sync {
    /// Acquire and return all channels.
    async fn read_traces(&self) -> Result<Vec<Vec<f64>>>;

    /// Channel labels in the order `read_traces()` returns them.
    async fn channel_labels(&self) -> Result<Vec<String>>;
}

/// Capability: Waveform Generation
///
/// Devices with an arbitrary-waveform lookup table.
#[async_trait]
pub trait WaveformGenerator: Send + Sync {
    /// Synthesize a waveform of `kind` from `params` and upload it to the
    /// DAC `channel` with the given `trigger` tag.
    ///
    /// Invalid input fails before anything is written to the device.
    ///
    /// # Returns
    /// Number of samples written.
    async fn load_waveform(
        &self,
        kind: &str,
        params: &[f64],
        channel: &str,
        trigger: &str,
    ) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_category_is_other() {
        assert_eq!(DeviceCategory::default(), DeviceCategory::Other);
        assert_eq!(DeviceCategory::Digitizer.label(), "Digitizers");
    }
}
