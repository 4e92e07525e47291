//! Red Pitaya IQ Acquisition/Generation Driver
//!
//! Driver for Red Pitaya STEMlab boards running the IQ demodulation FPGA
//! design. The board plays arbitrary waveforms from two 8192-sample DAC
//! lookup tables, demodulates both ADC inputs against four IQ reference
//! tables and streams the result as tick-framed ASCII samples.
//!
//! # Communication
//!
//! SCPI over TCP (default port 5000), `\r\n` terminated.
//!
//! # Capabilities
//!
//! - `Parameterized` - filter, window, period, output mode and format
//! - `WaveformGenerator` - `SIN`, `COS`, `RAMSEY`, `ECHO` and `STEP` tables
//! - `TraceProducer` - polling acquisition of `nb_measure` frames
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_red_pitaya::RedPitayaFactory;
//!
//! registry.register_factory(Box::new(RedPitayaFactory));
//!
//! let config = toml::toml! {
//!     host = "192.168.1.50"
//!     nb_measure = 100
//!
//!     [retry]
//!     max_buffer_faults = 10
//!     deadline_secs = 30.0
//! };
//! let components = factory.build(config.into()).await?;
//! ```
//!
//! # Mock Mode
//!
//! Set `mock = true` to talk to [`MockRedPitaya`], which simulates the data
//! server including buffer faults.

pub mod acquisition;
mod driver;
pub mod lut;
pub mod mock;
pub mod timing;
pub mod views;

pub use acquisition::{
    AcquisitionError, AcquisitionStats, DataFormat, OutputMode, RetryBudget, RetryConfig, Status,
    Traces,
};
pub use driver::{RedPitayaConfig, RedPitayaDriver, RedPitayaFactory, DEFAULT_PORT};
pub use lut::{fill_lut, Channel, LutError, Quadrature, Trigger, Waveform};
pub use mock::MockRedPitaya;
pub use views::{View, ViewValue};

/// Force linker to include this crate's factories.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<RedPitayaFactory>());
}
