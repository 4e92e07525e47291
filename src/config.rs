//! Lab configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/lab.toml`)
//! 2. environment variables prefixed with `QUBIT_DAQ_`, nested keys
//!    separated by a double underscore
//!    (`QUBIT_DAQ_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//! ```no_run
//! use qubit_daq::config::LabConfig;
//!
//! let config = LabConfig::load_from("config/lab.toml")?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), figment::Error>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/lab.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "QUBIT_DAQ_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level lab configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    /// Driver type (e.g. "rs_smb100a", "red_pitaya_iq", "mw_switch")
    pub r#type: String,
    /// Whether this instrument is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Driver-specific configuration, validated by the driver factory
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn default_name() -> String {
    "qubit-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::Table::new())
}

impl LabConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and the environment
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if instrument.id.is_empty() {
                return Err("Instrument ID cannot be empty".to_string());
            }
            if !ids.insert(&instrument.id) {
                return Err(format!("Duplicate instrument ID: {}", instrument.id));
            }
            if !instrument.config.is_table() {
                return Err(format!(
                    "Instrument '{}': 'config' must be a table",
                    instrument.id
                ));
            }
        }

        Ok(())
    }

    /// Get all enabled instruments
    pub fn enabled_instruments(&self) -> Vec<&InstrumentDefinition> {
        self.instruments
            .iter()
            .filter(|inst| inst.enabled)
            .collect()
    }

    /// Switch every instrument to its simulated device.
    pub fn force_mock(&mut self) {
        for instrument in &mut self.instruments {
            instrument.set_option("mock", toml::Value::Boolean(true));
        }
    }
}

impl InstrumentDefinition {
    /// Set a top-level key of the driver config.
    pub fn set_option(&mut self, key: &str, value: toml::Value) {
        if let toml::Value::Table(table) = &mut self.config {
            table.insert(key.to_string(), value);
        }
    }

    /// Set `key` inside the nested table `section`, creating it if needed.
    pub fn set_nested_option(&mut self, section: &str, key: &str, value: toml::Value) {
        if let toml::Value::Table(table) = &mut self.config {
            let entry = table
                .entry(section.to_string())
                .or_insert_with(empty_table);
            if let toml::Value::Table(inner) = entry {
                inner.insert(key.to_string(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn instrument(id: &str) -> InstrumentDefinition {
        InstrumentDefinition {
            id: id.to_string(),
            r#type: "mw_switch".to_string(),
            enabled: true,
            config: empty_table(),
        }
    }

    #[test]
    fn test_load_config_file() {
        let file = write_config(
            r#"
            [application]
            name = "Readout bench"
            log_level = "debug"

            [[instruments]]
            id = "source"
            type = "rs_smb100a"
            config = { host = "192.168.1.20" }

            [[instruments]]
            id = "switch"
            type = "mw_switch"
            enabled = false
            config = { mock = true }
            "#,
        );

        let config = LabConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "Readout bench");
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.instruments[0].r#type, "rs_smb100a");
        assert_eq!(
            config.instruments[0].config.get("host").and_then(|v| v.as_str()),
            Some("192.168.1.20")
        );
        assert_eq!(config.enabled_instruments().len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let file = write_config("");
        let config = LabConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "qubit-daq");
        assert_eq!(config.application.log_level, "info");
        assert!(config.instruments.is_empty());
    }

    #[test]
    fn test_invalid_log_level() {
        let config = LabConfig {
            application: ApplicationConfig {
                name: "Test".to_string(),
                log_level: "verbose".to_string(),
            },
            instruments: vec![],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_instrument_ids() {
        let config = LabConfig {
            application: ApplicationConfig::default(),
            instruments: vec![instrument("switch"), instrument("switch")],
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate instrument ID"));
    }

    #[test]
    fn test_force_mock_and_nested_options() {
        let mut config = LabConfig {
            application: ApplicationConfig::default(),
            instruments: vec![instrument("a"), instrument("b")],
        };
        config.force_mock();
        config.instruments[0].set_nested_option(
            "retry",
            "max_buffer_faults",
            toml::Value::Integer(3),
        );

        for inst in &config.instruments {
            assert_eq!(inst.config.get("mock"), Some(&toml::Value::Boolean(true)));
        }
        assert_eq!(
            config.instruments[0]
                .config
                .get("retry")
                .and_then(|r| r.get("max_buffer_faults"))
                .and_then(|v| v.as_integer()),
            Some(3)
        );
    }
}
