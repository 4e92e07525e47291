//! SCPI command templates.
//!
//! Every hardware-backed parameter carries the textual commands used to set
//! and query it. Set templates contain a single `{val}` placeholder that is
//! filled with the already-formatted wire value:
//!
//! ```rust
//! use daq_core::command::{fixed12, CommandTemplate};
//!
//! let cmd = CommandTemplate::new("FREQ:START {val}Hz", "FREQ:START?");
//! assert_eq!(
//!     cmd.render_set(&fixed12(5e9)).unwrap(),
//!     "FREQ:START 5000000000.000000000000Hz"
//! );
//! ```

use crate::error::DaqError;
use std::collections::HashMap;
use strfmt::strfmt;

/// Set/get command pair for one parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandTemplate {
    /// Set command, `{val}` is replaced by the wire value
    pub set: Option<&'static str>,
    /// Query command
    pub get: Option<&'static str>,
}

impl CommandTemplate {
    /// Template with both a set and a get command.
    pub const fn new(set: &'static str, get: &'static str) -> Self {
        Self {
            set: Some(set),
            get: Some(get),
        }
    }

    /// Template for a parameter that can only be written.
    pub const fn set_only(set: &'static str) -> Self {
        Self {
            set: Some(set),
            get: None,
        }
    }

    /// Template for a parameter that can only be queried.
    pub const fn get_only(get: &'static str) -> Self {
        Self {
            set: None,
            get: Some(get),
        }
    }

    /// Render the set command for an already formatted wire value.
    pub fn render_set(&self, wire_value: &str) -> Result<String, DaqError> {
        let template = self.set.ok_or_else(|| DaqError::CommandFormat {
            template: String::new(),
            message: "parameter has no set command".to_string(),
        })?;

        let mut fmt_context = HashMap::new();
        fmt_context.insert("val".to_string(), wire_value.to_string());

        strfmt(template, &fmt_context).map_err(|e| DaqError::CommandFormat {
            template: template.to_string(),
            message: e.to_string(),
        })
    }

    /// The query command, if any.
    pub fn query(&self) -> Result<&'static str, DaqError> {
        self.get.ok_or_else(|| DaqError::CommandFormat {
            template: String::new(),
            message: "parameter has no get command".to_string(),
        })
    }
}

/// Format a number with the 12-decimal precision the instruments expect.
pub fn fixed12(value: f64) -> String {
    format!("{:.12}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fixed_precision_value() {
        let cmd = CommandTemplate::new("frequency {val}Hz", "frequency?");
        assert_eq!(
            cmd.render_set(&fixed12(1e6)).unwrap(),
            "frequency 1000000.000000000000Hz"
        );
        assert_eq!(cmd.query().unwrap(), "frequency?");
    }

    #[test]
    fn bare_value_template() {
        let cmd = CommandTemplate::set_only("{val}");
        assert_eq!(cmd.render_set("start").unwrap(), "start");
    }

    #[test]
    fn missing_commands_are_reported() {
        let cmd = CommandTemplate::get_only("OUTPUT:DATASIZE?");
        assert!(cmd.render_set("1").is_err());

        let cmd = CommandTemplate::set_only("PERIOD {val}");
        assert!(cmd.query().is_err());
    }
}
