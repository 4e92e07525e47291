//! `daq-core`
//!
//! Core types and traits shared by the qubit-daq instrument drivers.
//!
//! ## Key Types
//!
//! - [`parameter::Parameter`]: typed, validated instrument setting with
//!   optional async hardware callbacks
//! - [`command::CommandTemplate`]: SCPI set/get templates rendered with `strfmt`
//! - [`scpi::ScpiClient`]: newline-terminated SCPI over TCP, behind the
//!   [`scpi::ScpiOps`] seam so drivers can run against mocks
//! - [`driver::DriverFactory`]: config-driven driver construction
//! - [`error::DaqError`]: shared error taxonomy

pub mod capabilities;
pub mod command;
pub mod driver;
pub mod error;
pub mod parameter;
pub mod scpi;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use error::{AppResult, DaqError};
