//! Microwave switch controller
//!
//! Two SPDT switches sit in the readout chain: one at room temperature
//! (positions `NC`/`NO`) and one inside the cryostat (positions 1/2).
//! Each position maps to a single-digit code understood by the Arduino.

use crate::transport::{MockSerial, SerialWrite, TcpSerialBridge};
use anyhow::{Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{DeviceCategory, Parameterized, Routable};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::parameter::{Parameter, ParameterSet};
use daq_core::scpi::to_daq_error;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Cached value of a switch that has not been commanded yet.
const UNKNOWN_POSITION: &str = "unknown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    #[error("room temperature switch position must be NC or NO, got '{0}'")]
    InvalidRtPosition(String),

    #[error("cryogenic switch position must be 1 or 2, got '{0}'")]
    InvalidCryoPosition(String),

    #[error("unknown switch '{0}' (expected 'rt' or 'cryo')")]
    UnknownSwitch(String),
}

// =============================================================================
// Positions
// =============================================================================

/// Room-temperature switch position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtSwitchPosition {
    /// Normally closed port
    Nc,
    /// Normally open port
    No,
}

impl RtSwitchPosition {
    pub fn code(self) -> u8 {
        match self {
            Self::Nc => 6,
            Self::No => 7,
        }
    }
}

impl fmt::Display for RtSwitchPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nc => "NC",
            Self::No => "NO",
        })
    }
}

impl FromStr for RtSwitchPosition {
    type Err = SwitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NC" => Ok(Self::Nc),
            "NO" => Ok(Self::No),
            other => Err(SwitchError::InvalidRtPosition(other.to_string())),
        }
    }
}

/// Cryogenic switch position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryoSwitchPosition {
    One,
    Two,
}

impl CryoSwitchPosition {
    pub fn code(self) -> u8 {
        match self {
            Self::One => 4,
            Self::Two => 5,
        }
    }
}

impl fmt::Display for CryoSwitchPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::One => "1",
            Self::Two => "2",
        })
    }
}

impl TryFrom<u8> for CryoSwitchPosition {
    type Error = SwitchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(SwitchError::InvalidCryoPosition(other.to_string())),
        }
    }
}

impl FromStr for CryoSwitchPosition {
    type Err = SwitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map_err(|_| SwitchError::InvalidCryoPosition(s.to_string()))
            .and_then(Self::try_from)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the switch controller.
///
/// Exactly one link is used: the TCP serial bridge (`host` + `port`), a
/// local serial port (`serial_port`, needs the `serial` feature) or the
/// in-memory mock.
#[derive(Debug, Clone, Deserialize)]
pub struct MwSwitchConfig {
    /// Serial bridge host
    #[serde(default)]
    pub host: Option<String>,

    /// Serial bridge port
    #[serde(default)]
    pub port: Option<u16>,

    /// Local serial device (e.g. "/dev/ttyACM0")
    #[serde(default)]
    pub serial_port: Option<String>,

    /// Record codes instead of sending them
    #[serde(default)]
    pub mock: bool,
}

impl MwSwitchConfig {
    fn endpoint(&self) -> Option<String> {
        match (&self.host, self.port, &self.serial_port) {
            (Some(host), Some(port), _) => Some(format!("{}:{}", host, port)),
            (_, _, Some(path)) => Some(path.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// MwSwitchDriver
// =============================================================================

/// Driver for the Arduino switch controller.
pub struct MwSwitchDriver {
    writer: Arc<dyn SerialWrite>,
    params: ParameterSet,

    /// Last commanded room-temperature position
    rt_switch: Parameter<String>,

    /// Last commanded cryogenic position
    cryo_switch: Parameter<String>,
}

impl MwSwitchDriver {
    /// Open the link described by `config`.
    pub async fn connect(config: &MwSwitchConfig) -> Result<Arc<Self>> {
        let writer: Arc<dyn SerialWrite> = if config.mock {
            tracing::info!("Creating mock microwave switch driver");
            Arc::new(MockSerial::new())
        } else if let (Some(host), Some(port)) = (&config.host, config.port) {
            Arc::new(TcpSerialBridge::connect(host, port).await?)
        } else if let Some(path) = &config.serial_port {
            open_serial(path).await?
        } else {
            anyhow::bail!("switch controller needs 'host' and 'port', 'serial_port' or 'mock'");
        };
        Ok(Arc::new(Self::with_writer(writer)))
    }

    pub fn with_writer(writer: Arc<dyn SerialWrite>) -> Self {
        let mut rt_switch = Parameter::new("rt_switch", UNKNOWN_POSITION.to_string())
            .with_description("Room temperature switch position (NC/NO)")
            .with_choices(vec!["NC".to_string(), "NO".to_string()]);
        let link = writer.clone();
        rt_switch.connect_to_hardware_write(move |value: String| {
            let link = link.clone();
            Box::pin(async move {
                let position: RtSwitchPosition = value
                    .parse()
                    .map_err(|e: SwitchError| to_daq_error(e.into()))?;
                link.serial_write(position.code()).await.map_err(to_daq_error)
            })
        });

        let mut cryo_switch = Parameter::new("cryo_switch", UNKNOWN_POSITION.to_string())
            .with_description("Cryogenic switch position (1/2)")
            .with_choices(vec!["1".to_string(), "2".to_string()]);
        let link = writer.clone();
        cryo_switch.connect_to_hardware_write(move |value: String| {
            let link = link.clone();
            Box::pin(async move {
                let position: CryoSwitchPosition = value
                    .parse()
                    .map_err(|e: SwitchError| to_daq_error(e.into()))?;
                link.serial_write(position.code()).await.map_err(to_daq_error)
            })
        });

        let mut params = ParameterSet::new();
        params.register(rt_switch.clone());
        params.register(cryo_switch.clone());

        Self {
            writer,
            params,
            rt_switch,
            cryo_switch,
        }
    }

    /// Route the room-temperature switch.
    ///
    /// `"NC"` sends code 6 and `"NO"` code 7. Any other input is logged as
    /// an error and nothing is written; the call itself still succeeds.
    pub async fn set_rt_switch(&self, position: &str) -> Result<()> {
        match position.parse::<RtSwitchPosition>() {
            Ok(position) => self.select_rt(position).await,
            Err(e) => {
                tracing::error!("Room temperature switch input error: {}", e);
                Ok(())
            }
        }
    }

    /// Route the cryogenic switch.
    ///
    /// Position 1 sends code 4 and position 2 code 5. Other values are
    /// logged as an error without writing.
    pub async fn set_cryo_switch(&self, position: u8) -> Result<()> {
        match CryoSwitchPosition::try_from(position) {
            Ok(position) => self.select_cryo(position).await,
            Err(e) => {
                tracing::error!("Cryogenic switch input error: {}", e);
                Ok(())
            }
        }
    }

    pub async fn select_rt(&self, position: RtSwitchPosition) -> Result<()> {
        self.writer.serial_write(position.code()).await?;
        self.rt_switch.set_cached(position.to_string());
        tracing::info!(position = %position, "Room temperature switch routed");
        Ok(())
    }

    pub async fn select_cryo(&self, position: CryoSwitchPosition) -> Result<()> {
        self.writer.serial_write(position.code()).await?;
        self.cryo_switch.set_cached(position.to_string());
        tracing::info!(position = %position, "Cryogenic switch routed");
        Ok(())
    }

    pub fn rt_switch(&self) -> &Parameter<String> {
        &self.rt_switch
    }

    pub fn cryo_switch(&self) -> &Parameter<String> {
        &self.cryo_switch
    }
}

#[cfg(feature = "serial")]
async fn open_serial(path: &str) -> Result<Arc<dyn SerialWrite>> {
    Ok(Arc::new(crate::transport::SerialPortWriter::open(path).await?))
}

#[cfg(not(feature = "serial"))]
async fn open_serial(path: &str) -> Result<Arc<dyn SerialWrite>> {
    anyhow::bail!(
        "serial port '{}' requested but the 'serial' feature is not enabled",
        path
    )
}

impl Parameterized for MwSwitchDriver {
    fn parameters(&self) -> &ParameterSet {
        &self.params
    }
}

#[async_trait]
impl Routable for MwSwitchDriver {
    async fn route(&self, switch: &str, position: &str) -> Result<()> {
        match switch {
            "rt" => self.set_rt_switch(position).await,
            "cryo" => match position.parse::<CryoSwitchPosition>() {
                Ok(position) => self.select_cryo(position).await,
                Err(e) => {
                    tracing::error!("Cryogenic switch input error: {}", e);
                    Ok(())
                }
            },
            other => Err(SwitchError::UnknownSwitch(other.to_string()).into()),
        }
    }

    fn switches(&self) -> &'static [&'static str] {
        &["rt", "cryo"]
    }
}

// =============================================================================
// MwSwitchFactory
// =============================================================================

/// Factory for the Arduino switch controller.
pub struct MwSwitchFactory;

static MW_SWITCH_CAPABILITIES: &[Capability] = &[Capability::Parameterized, Capability::Routable];

impl DriverFactory for MwSwitchFactory {
    fn driver_type(&self) -> &'static str {
        "mw_switch"
    }

    fn name(&self) -> &'static str {
        "Arduino microwave switch controller"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MW_SWITCH_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MwSwitchConfig = config
            .clone()
            .try_into()
            .context("Invalid switch controller config")?;

        if cfg.mock {
            return Ok(());
        }

        match (&cfg.host, cfg.port, &cfg.serial_port) {
            (Some(_), Some(_), Some(_)) => {
                anyhow::bail!("set either 'host'/'port' or 'serial_port', not both")
            }
            (Some(host), Some(port), None) => {
                if host.is_empty() {
                    anyhow::bail!("'host' field cannot be empty");
                }
                if port == 0 {
                    anyhow::bail!("'port' field cannot be 0");
                }
            }
            (None, None, Some(path)) => {
                if path.is_empty() {
                    anyhow::bail!("'serial_port' field cannot be empty");
                }
            }
            (Some(_), None, _) | (None, Some(_), _) => {
                anyhow::bail!("'host' and 'port' must be given together")
            }
            (None, None, None) => {
                anyhow::bail!("switch controller needs 'host' and 'port', 'serial_port' or 'mock'")
            }
        }

        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MwSwitchConfig = config
                .try_into()
                .context("Invalid switch controller config")?;

            let driver = MwSwitchDriver::connect(&cfg).await?;

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Switch)
                .with_parameterized(driver.clone())
                .with_routable(driver)
                .with_metadata(DeviceMetadata {
                    identity: None,
                    endpoint: cfg.endpoint(),
                    mock: cfg.mock,
                }))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn mock_driver() -> (Arc<MockSerial>, MwSwitchDriver) {
        let mock = Arc::new(MockSerial::new());
        let driver = MwSwitchDriver::with_writer(mock.clone());
        (mock, driver)
    }

    #[test]
    fn positions_map_to_codes() {
        assert_eq!("NC".parse::<RtSwitchPosition>().unwrap().code(), 6);
        assert_eq!("NO".parse::<RtSwitchPosition>().unwrap().code(), 7);
        assert_eq!(CryoSwitchPosition::try_from(1).unwrap().code(), 4);
        assert_eq!(CryoSwitchPosition::try_from(2).unwrap().code(), 5);

        assert!("nc".parse::<RtSwitchPosition>().is_err());
        assert_eq!(
            CryoSwitchPosition::try_from(3),
            Err(SwitchError::InvalidCryoPosition("3".to_string()))
        );
    }

    #[tokio::test]
    async fn valid_positions_write_their_codes() -> Result<()> {
        let (mock, driver) = mock_driver();

        driver.set_rt_switch("NC").await?;
        driver.set_rt_switch("NO").await?;
        driver.set_cryo_switch(1).await?;
        driver.set_cryo_switch(2).await?;

        assert_eq!(mock.codes().await, vec![6, 7, 4, 5]);
        assert_eq!(driver.rt_switch().get(), "NO");
        assert_eq!(driver.cryo_switch().get(), "2");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_input_writes_nothing_and_succeeds() -> Result<()> {
        let (mock, driver) = mock_driver();

        driver.set_rt_switch("XX").await?;
        driver.set_cryo_switch(3).await?;
        driver.set_cryo_switch(0).await?;

        assert!(mock.codes().await.is_empty());
        assert_eq!(driver.rt_switch().get(), UNKNOWN_POSITION);
        Ok(())
    }

    #[tokio::test]
    async fn route_dispatches_by_switch_name() -> Result<()> {
        let (mock, driver) = mock_driver();
        let routable: &dyn Routable = &driver;

        routable.route("rt", "NO").await?;
        routable.route("cryo", "1").await?;
        routable.route("cryo", "many").await?;
        assert_eq!(mock.codes().await, vec![7, 4]);

        let err = routable.route("attenuator", "1").await.unwrap_err();
        assert!(err.to_string().contains("unknown switch"));
        assert_eq!(routable.switches(), &["rt", "cryo"]);
        Ok(())
    }

    #[tokio::test]
    async fn parameters_write_through_the_link() -> Result<()> {
        let (mock, driver) = mock_driver();

        let param = driver.parameters().get("cryo_switch").unwrap();
        param.set_from_str("2").await?;
        assert_eq!(mock.codes().await, vec![5]);
        assert_eq!(param.value_string(), "2");

        // rejected by the choices validator before anything is written
        assert!(driver.rt_switch().set("nc".to_string()).await.is_err());
        assert_eq!(mock.codes().await, vec![5]);
        Ok(())
    }

    #[tokio::test]
    async fn bridge_link_carries_ascii_codes() -> Result<()> {
        let (mut host, device) = tokio::io::duplex(32);
        let bridge = TcpSerialBridge::with_stream(Box::new(device), "duplex");
        let driver = MwSwitchDriver::with_writer(Arc::new(bridge));

        driver.set_rt_switch("NC").await?;
        driver.set_cryo_switch(2).await?;

        let mut buf = [0u8; 2];
        host.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"65");
        Ok(())
    }

    #[test]
    fn test_factory_driver_type() {
        let factory = MwSwitchFactory;
        assert_eq!(factory.driver_type(), "mw_switch");
        assert_eq!(
            factory.capabilities(),
            &[Capability::Parameterized, Capability::Routable]
        );
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = MwSwitchFactory;

        let bridge = toml::Value::Table(toml::toml! {
            host = "192.168.1.30"
            port = 8888
        });
        assert!(factory.validate(&bridge).is_ok());

        let serial = toml::Value::Table(toml::toml! {
            serial_port = "/dev/ttyACM0"
        });
        assert!(factory.validate(&serial).is_ok());

        let mock = toml::Value::Table(toml::toml! {
            mock = true
        });
        assert!(factory.validate(&mock).is_ok());

        let host_only = toml::Value::Table(toml::toml! {
            host = "192.168.1.30"
        });
        assert!(factory.validate(&host_only).is_err());

        let zero_port = toml::Value::Table(toml::toml! {
            host = "192.168.1.30"
            port = 0
        });
        assert!(factory.validate(&zero_port).is_err());

        let nothing = toml::Value::Table(toml::Table::new());
        assert!(factory.validate(&nothing).is_err());
    }

    #[tokio::test]
    async fn test_factory_builds_mock_switch() -> Result<()> {
        let factory = MwSwitchFactory;
        let config = toml::Value::Table(toml::toml! {
            mock = true
        });

        let components = factory.build(config).await?;
        assert_eq!(components.category, Some(DeviceCategory::Switch));
        assert!(components.metadata.mock);

        let routable = components.routable.expect("switch is routable");
        routable.route("rt", "NC").await?;
        Ok(())
    }
}
