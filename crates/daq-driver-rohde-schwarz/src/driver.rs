//! SMB100A Driver
//!
//! # Parameters
//!
//! - `frequency` - CW frequency (Hz)
//! - `power` - output level (dBm), values above 16 dBm are logged
//! - `phase` - phase offset (rad on the user side, degrees on the wire)
//! - `status` - RF output `on`/`off`
//! - `freq_start`, `freq_stop`, `freq_step`, `freq_points`, `dwell_time` - sweep
//!
//! Sweep settings are not checked against each other; the instrument
//! resolves inconsistent combinations itself.

use crate::mock::MockSmb100a;
use anyhow::{Context, Result};
use daq_core::capabilities::{DeviceCategory, Parameterized};
use daq_core::command::{fixed12, CommandTemplate};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::error::DaqError;
use daq_core::parameter::{Parameter, ParameterSet};
use daq_core::scpi::{
    bind_parameter, decode_f64, decode_i64, ScpiClient, ScpiOps, Terminator, WireCodec,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Raw SCPI socket port of R&S instruments
pub const DEFAULT_PORT: u16 = 5025;

/// Highest power the SMB100A delivers with guaranteed level accuracy
const POWER_WARN_DBM: f64 = 16.0;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the SMB100A driver
#[derive(Debug, Clone, Deserialize)]
pub struct Smb100aConfig {
    /// Hostname or IP address of the generator
    pub host: String,

    /// SCPI port (default: 5025)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable mock mode for testing without hardware
    #[serde(default)]
    pub mock: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

// =============================================================================
// Conversions
// =============================================================================

pub fn rad_to_deg(theta: f64) -> f64 {
    theta * 180.0 / PI
}

pub fn deg_to_rad(theta: f64) -> f64 {
    theta * PI / 180.0
}

/// RF output state; `1`/`0` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputState {
    On,
    #[default]
    Off,
}

impl OutputState {
    pub fn wire(&self) -> &'static str {
        match self {
            OutputState::On => "1",
            OutputState::Off => "0",
        }
    }

    pub fn from_wire(reply: &str) -> Result<Self, DaqError> {
        match reply.trim() {
            "1" => Ok(OutputState::On),
            "0" => Ok(OutputState::Off),
            other => Err(DaqError::Instrument(format!(
                "unexpected output state '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputState::On => "on",
            OutputState::Off => "off",
        })
    }
}

impl FromStr for OutputState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "on" => Ok(OutputState::On),
            "off" => Ok(OutputState::Off),
            other => Err(format!("expected 'on' or 'off', got '{}'", other)),
        }
    }
}

fn float_codec() -> WireCodec<f64> {
    WireCodec::new(|v: &f64| Ok(fixed12(*v)), decode_f64)
}

// =============================================================================
// Smb100aDriver
// =============================================================================

/// Driver for the Rohde & Schwarz SMB100A.
///
/// ```rust,ignore
/// let source = Smb100aDriver::new_async("192.168.1.20", 5025, false).await?;
/// source.frequency().set(5.1e9).await?;
/// source.power().set(-10.0).await?;
/// source.status().set(OutputState::On).await?;
/// ```
pub struct Smb100aDriver {
    client: Arc<dyn ScpiOps>,
    params: ParameterSet,

    frequency: Parameter<f64>,
    power: Parameter<f64>,
    phase: Parameter<f64>,
    status: Parameter<OutputState>,
    freq_start: Parameter<f64>,
    freq_stop: Parameter<f64>,
    freq_step: Parameter<f64>,
    freq_points: Parameter<i64>,
    dwell_time: Parameter<f64>,
}

impl Smb100aDriver {
    /// Connect (or create a mock) and validate the connection with `*IDN?`.
    pub async fn new_async(host: &str, port: u16, mock: bool) -> Result<Arc<Self>> {
        let client = connect_client(host, port, mock).await?;
        let (driver, identity) = Self::identified(client).await?;
        tracing::info!("SMB100A driver initialized: {} (mock={})", identity, mock);
        Ok(Arc::new(driver))
    }

    /// Build a driver around `client` and validate it; returns the driver
    /// together with its `*IDN?` reply.
    pub async fn identified(client: Arc<dyn ScpiOps>) -> Result<(Self, String)> {
        let driver = Self::with_client(client);
        let identity = driver.validate_connection().await?;
        Ok((driver, identity))
    }

    /// Build a driver around an existing client. No I/O happens here.
    pub fn with_client(client: Arc<dyn ScpiOps>) -> Self {
        let mut frequency = Parameter::new("frequency", 1e9)
            .with_description("Output frequency in Hz")
            .with_unit("Hz")
            .with_range(100e3, 20e9)
            .with_command(CommandTemplate::new("frequency {val}Hz", "frequency?"));
        bind_parameter(&mut frequency, client.clone(), float_codec());

        let mut power = Parameter::new("power", -30.0)
            .with_description("Output power in dBm")
            .with_unit("dBm")
            .with_range(-120.0, 30.0)
            .with_command(CommandTemplate::new("power {val}", "power?"));
        bind_parameter(
            &mut power,
            client.clone(),
            WireCodec::new(
                |dbm: &f64| {
                    if *dbm > POWER_WARN_DBM {
                        tracing::warn!(
                            power = *dbm,
                            "SMB100A: power over range (limit to 16 dBm)"
                        );
                    }
                    Ok(fixed12(*dbm))
                },
                decode_f64,
            ),
        );

        let mut phase = Parameter::new("phase", 0.0)
            .with_description("Output phase in Rad")
            .with_unit("Rad")
            .with_range(-2.0 * PI, 2.0 * PI)
            .with_command(CommandTemplate::new("phase {val}", "phase?"));
        bind_parameter(
            &mut phase,
            client.clone(),
            WireCodec::new(
                |rad: &f64| Ok(fixed12(rad_to_deg(*rad))),
                |reply: &str| decode_f64(reply).map(deg_to_rad),
            ),
        );

        let mut status = Parameter::new("status", OutputState::Off)
            .with_description("Output on/off")
            .with_unit("NA")
            .with_choices(vec![OutputState::On, OutputState::Off])
            .with_command(CommandTemplate::new("output {val}", "output?"));
        bind_parameter(
            &mut status,
            client.clone(),
            WireCodec::new(
                |state: &OutputState| Ok(state.wire().to_string()),
                OutputState::from_wire,
            ),
        );

        let mut freq_start = Parameter::new("freq_start", 100e3)
            .with_description("Sweep: start frequency in Hz")
            .with_unit("Hz")
            .with_range(100e3, 20e9)
            .with_command(CommandTemplate::new("FREQ:START {val}Hz", "FREQ:START?"));
        bind_parameter(&mut freq_start, client.clone(), float_codec());

        let mut freq_stop = Parameter::new("freq_stop", 20e9)
            .with_description("Sweep: stop frequency in Hz")
            .with_unit("Hz")
            .with_range(100e3, 20e9)
            .with_command(CommandTemplate::new("FREQ:STOP {val}Hz", "FREQ:STOP?"));
        bind_parameter(&mut freq_stop, client.clone(), float_codec());

        let mut freq_step = Parameter::new("freq_step", 1e6)
            .with_description("Sweep: frequency step")
            .with_unit("Hz")
            .with_range(100e3, 20e9)
            .with_command(CommandTemplate::new("SWE:STEP {val}Hz", "SWE:STEP?"));
        bind_parameter(&mut freq_step, client.clone(), float_codec());

        let mut freq_points = Parameter::new("freq_points", 101_i64)
            .with_description("Sweep: frequency points")
            .with_range(2, 65535)
            .with_command(CommandTemplate::new("SWE:POIN {val}", "SWE:POIN?"));
        bind_parameter(
            &mut freq_points,
            client.clone(),
            WireCodec::new(|n: &i64| Ok(fixed12(*n as f64)), decode_i64),
        );

        let mut dwell_time = Parameter::new("dwell_time", 10e-3)
            .with_description("Sweep: dwell time")
            .with_unit("s")
            .with_range(1e-3, 100.0)
            .with_command(CommandTemplate::new("SWE:DWEL {val}s", "SWE:DWEL?"));
        bind_parameter(&mut dwell_time, client.clone(), float_codec());

        let mut params = ParameterSet::new();
        params.register(frequency.clone());
        params.register(power.clone());
        params.register(phase.clone());
        params.register(status.clone());
        params.register(freq_start.clone());
        params.register(freq_stop.clone());
        params.register(freq_step.clone());
        params.register(freq_points.clone());
        params.register(dwell_time.clone());

        Self {
            client,
            params,
            frequency,
            power,
            phase,
            status,
            freq_start,
            freq_stop,
            freq_step,
            freq_points,
            dwell_time,
        }
    }

    /// Query `*IDN?` and return the identification string.
    pub async fn validate_connection(&self) -> Result<String> {
        let idn = self.client.query("*IDN?").await?;
        if idn.trim().is_empty() {
            anyhow::bail!("SMB100A returned an empty identification");
        }
        tracing::debug!("Validated connection: {}", idn);
        Ok(idn)
    }

    /// Read every parameter back from the instrument into the cache.
    pub async fn refresh(&self) -> Result<()> {
        for param in self.params.iter() {
            let value = param
                .refresh()
                .await
                .with_context(|| format!("refreshing '{}'", param.name()))?;
            tracing::debug!("SMB100A {} = {}", param.name(), value);
        }
        Ok(())
    }

    // =========================================================================
    // Parameter Accessors
    // =========================================================================

    pub fn frequency(&self) -> &Parameter<f64> {
        &self.frequency
    }

    pub fn power(&self) -> &Parameter<f64> {
        &self.power
    }

    /// Phase in radians
    pub fn phase(&self) -> &Parameter<f64> {
        &self.phase
    }

    pub fn status(&self) -> &Parameter<OutputState> {
        &self.status
    }

    pub fn freq_start(&self) -> &Parameter<f64> {
        &self.freq_start
    }

    pub fn freq_stop(&self) -> &Parameter<f64> {
        &self.freq_stop
    }

    pub fn freq_step(&self) -> &Parameter<f64> {
        &self.freq_step
    }

    pub fn freq_points(&self) -> &Parameter<i64> {
        &self.freq_points
    }

    pub fn dwell_time(&self) -> &Parameter<f64> {
        &self.dwell_time
    }
}

impl Parameterized for Smb100aDriver {
    fn parameters(&self) -> &ParameterSet {
        &self.params
    }
}

// =============================================================================
// Smb100aFactory
// =============================================================================

/// Factory for creating SMB100A driver instances.
pub struct Smb100aFactory;

static SMB100A_CAPABILITIES: &[Capability] = &[Capability::Parameterized];

impl DriverFactory for Smb100aFactory {
    fn driver_type(&self) -> &'static str {
        "rs_smb100a"
    }

    fn name(&self) -> &'static str {
        "Rohde & Schwarz SMB100A"
    }

    fn capabilities(&self) -> &'static [Capability] {
        SMB100A_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Smb100aConfig = config
            .clone()
            .try_into()
            .context("Invalid SMB100A config")?;

        if cfg.host.is_empty() {
            anyhow::bail!("'host' field cannot be empty");
        }
        if cfg.port == 0 {
            anyhow::bail!("'port' field cannot be 0");
        }

        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Smb100aConfig = config.try_into().context("Invalid SMB100A config")?;

            let client = connect_client(&cfg.host, cfg.port, cfg.mock).await?;
            build_components(client, &cfg).await
        })
    }
}

async fn connect_client(host: &str, port: u16, mock: bool) -> Result<Arc<dyn ScpiOps>> {
    if mock {
        tracing::info!("Creating mock SMB100A driver");
        return Ok(Arc::new(MockSmb100a::new()));
    }
    tracing::info!("Connecting to SMB100A at {}:{}", host, port);
    let client = ScpiClient::connect(host, port, Terminator::Lf)
        .await
        .with_context(|| format!("SMB100A at {}:{}", host, port))?;
    Ok(Arc::new(client))
}

async fn build_components(
    client: Arc<dyn ScpiOps>,
    cfg: &Smb100aConfig,
) -> Result<DeviceComponents> {
    let (driver, identity) = Smb100aDriver::identified(client).await?;
    tracing::info!("SMB100A driver initialized: {} (mock={})", identity, cfg.mock);
    driver.refresh().await?;

    Ok(DeviceComponents::new()
        .with_category(DeviceCategory::SignalSource)
        .with_parameterized(Arc::new(driver))
        .with_metadata(DeviceMetadata {
            identity: Some(identity),
            endpoint: Some(format!("{}:{}", cfg.host, cfg.port)),
            mock: cfg.mock,
        }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_driver() -> (Arc<MockSmb100a>, Smb100aDriver) {
        let mock = Arc::new(MockSmb100a::new());
        let driver = Smb100aDriver::with_client(mock.clone());
        (mock, driver)
    }

    #[test]
    fn test_factory_driver_type() {
        let factory = Smb100aFactory;
        assert_eq!(factory.driver_type(), "rs_smb100a");
        assert_eq!(factory.capabilities(), &[Capability::Parameterized]);
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = Smb100aFactory;

        let valid = toml::Value::Table(toml::toml! {
            host = "192.168.1.20"
        });
        assert!(factory.validate(&valid).is_ok());

        let empty_host = toml::Value::Table(toml::toml! {
            host = ""
        });
        assert!(factory.validate(&empty_host).is_err());

        let zero_port = toml::Value::Table(toml::toml! {
            host = "192.168.1.20"
            port = 0
        });
        assert!(factory.validate(&zero_port).is_err());

        let missing_host = toml::Value::Table(toml::toml! {
            port = 5025
        });
        assert!(factory.validate(&missing_host).is_err());
    }

    #[tokio::test]
    async fn test_factory_build_mock_refreshes_cache() {
        let config = toml::Value::Table(toml::toml! {
            host = "192.168.1.20"
            mock = true
        });

        let components = Smb100aFactory.build(config).await.unwrap();
        assert!(components.metadata.identity.unwrap().contains("SMB100A"));

        let params = components.parameterized.unwrap();
        let params = params.parameters();
        assert_eq!(params.get("status").unwrap().value_string(), "off");
        assert_eq!(params.get("freq_points").unwrap().value_string(), "101");
    }

    #[tokio::test]
    async fn test_factory_build_identifies_once() {
        let cfg: Smb100aConfig = toml::Value::Table(toml::toml! {
            host = "192.168.1.20"
            mock = true
        })
        .try_into()
        .unwrap();
        let mock = Arc::new(MockSmb100a::new());

        let components = build_components(mock.clone(), &cfg).await.unwrap();
        assert!(components.metadata.identity.unwrap().contains("SMB100A"));

        let idn_queries = mock.queries().await.iter().filter(|q| *q == "*IDN?").count();
        assert_eq!(idn_queries, 1);
    }

    #[test]
    fn test_angle_conversions() {
        assert!((rad_to_deg(PI) - 180.0).abs() < 1e-12);
        assert!((deg_to_rad(90.0) - PI / 2.0).abs() < 1e-12);
        assert!((deg_to_rad(rad_to_deg(1.234)) - 1.234).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_wire_format() {
        let (mock, driver) = mock_driver();

        driver.frequency().set(5.1e9).await.unwrap();
        driver.power().set(-10.5).await.unwrap();
        driver.phase().set(PI / 2.0).await.unwrap();
        driver.status().set(OutputState::On).await.unwrap();
        driver.freq_start().set(4e9).await.unwrap();
        driver.freq_points().set(201).await.unwrap();
        driver.dwell_time().set(0.5).await.unwrap();

        assert_eq!(
            mock.writes().await,
            vec![
                "frequency 5100000000.000000000000Hz",
                "power -10.500000000000",
                "phase 90.000000000000",
                "output 1",
                "FREQ:START 4000000000.000000000000Hz",
                "SWE:POIN 201.000000000000",
                "SWE:DWEL 0.500000000000s",
            ]
        );
    }

    #[tokio::test]
    async fn test_read_back_converts_units() {
        let (_mock, driver) = mock_driver();

        driver.phase().set(-PI).await.unwrap();
        driver.phase().set_cached(0.0);
        let phase = driver.phase().read_from_hardware().await.unwrap();
        assert!((phase + PI).abs() < 1e-9);

        driver.status().set(OutputState::On).await.unwrap();
        assert_eq!(
            driver.status().read_from_hardware().await.unwrap(),
            OutputState::On
        );

        driver.frequency().set(2.5e9).await.unwrap();
        assert_eq!(driver.frequency().read_from_hardware().await.unwrap(), 2.5e9);
    }

    #[tokio::test]
    async fn test_out_of_range_rejected_before_write() {
        let (mock, driver) = mock_driver();

        assert!(driver.frequency().set(50e3).await.is_err());
        assert!(driver.frequency().set(21e9).await.is_err());
        assert!(driver.power().set(31.0).await.is_err());
        assert!(driver.phase().set(7.0).await.is_err());
        assert!(driver.freq_points().set(1).await.is_err());
        assert!(driver.dwell_time().set(1e-4).await.is_err());
        assert!(mock.writes().await.is_empty());

        // 16..30 dBm is accepted with a warning
        driver.power().set(20.0).await.unwrap();
        assert_eq!(mock.writes().await, vec!["power 20.000000000000"]);
    }

    #[tokio::test]
    async fn test_status_from_text() {
        let (mock, driver) = mock_driver();

        let status = driver.parameters().get("status").unwrap();
        status.set_from_str("on").await.unwrap();
        assert_eq!(status.value_string(), "on");
        assert!(status.set_from_str("ON").await.is_err());
        assert_eq!(mock.writes().await, vec!["output 1"]);
    }
}
