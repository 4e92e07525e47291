//! Shared error types for qubit-daq drivers.
//!
//! `DaqError` is the taxonomy that crosses crate boundaries: parameter
//! validation failures, instrument communication problems and configuration
//! mistakes. Driver crates keep their own narrower `thiserror` enums for
//! domain errors (LUT synthesis, acquisition) and convert into `DaqError` or
//! `anyhow::Error` at the edges.
//!
//! ## Categories
//!
//! 1. **Configuration** - `Configuration`, `ParameterOutOfRange`,
//!    `ParameterInvalidChoice`, `ParameterReadOnly`. Raised before anything is
//!    written to the device.
//! 2. **Communication** - `Io`, `Instrument`, `Timeout`, `Driver`. May be
//!    transient.
//! 3. **Programming** - `ParameterNoHardwareReader`, `CommandFormat`.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Initialization,
    Configuration,
    Communication,
    Hardware,
    Timeout,
    InvalidParameter,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
        };
        write!(f, "{}", label)
    }
}

#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    pub driver_type: String,
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the shared error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type shared by all qubit-daq crates.
///
/// # Example
///
/// ```rust
/// use daq_core::error::DaqError;
///
/// fn validate_port(port: u16) -> Result<(), DaqError> {
///     if port == 0 {
///         return Err(DaqError::Configuration("'port' field cannot be 0".into()));
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration values parsed but are semantically wrong.
    ///
    /// **Recovery Strategy**: fix the configuration and rebuild the device.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed (TCP socket, serial port).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument reported an error or sent an unparsable reply.
    ///
    /// **Recovery Strategy**: retry a small number of times, then check the
    /// device. Buffer faults of the Red Pitaya data server are handled by
    /// the acquisition loop and never surface here.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// No reply within the configured timeout.
    #[error("Timeout waiting for response to: {0}")]
    Timeout(String),

    /// Structured driver error with category
    #[error("{0}")]
    Driver(DriverError),

    /// A command template could not be rendered.
    #[error("Failed to format command '{template}': {message}")]
    CommandFormat { template: String, message: String },

    /// Value outside the parameter's legal range.
    #[error("Parameter '{name}' value {value} outside range [{min}, {max}]")]
    ParameterOutOfRange {
        name: String,
        value: String,
        min: String,
        max: String,
    },

    /// Attempted to modify a read-only parameter.
    #[error("Parameter '{0}' is read-only")]
    ParameterReadOnly(String),

    /// Value is not one of the parameter's allowed choices.
    #[error("Invalid choice for parameter '{name}': {value}")]
    ParameterInvalidChoice { name: String, value: String },

    /// No hardware reader connected for parameter.
    #[error("No hardware reader connected for parameter '{0}'")]
    ParameterNoHardwareReader(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Instrument("no reply to *IDN?".to_string());
        assert_eq!(err.to_string(), "Instrument error: no reply to *IDN?");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = DaqError::ParameterOutOfRange {
            name: "power".into(),
            value: "31".into(),
            min: "-120".into(),
            max: "30".into(),
        };
        assert_eq!(
            err.to_string(),
            "Parameter 'power' value 31 outside range [-120, 30]"
        );
    }

    #[test]
    fn test_driver_error_display() {
        let err = DaqError::Driver(DriverError::new(
            "red_pitaya_iq",
            DriverErrorKind::Communication,
            "connection refused",
        ));
        assert!(err
            .to_string()
            .contains("Driver 'red_pitaya_iq' communication error"));
    }
}
