//! Driver Factory and Component Types
//!
//! This module provides the plugin API for configured instruments.
//! Drivers implement [`DriverFactory`] and are registered with the
//! `DriverRegistry` at startup via explicit `register_factory(factory)` calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Composition Root (main.rs)              │
//! │  registry.register_factory(Smb100aFactory);                     │
//! │  registry.register_factory(RedPitayaFactory);                   │
//! │  registry.register_factory(MwSwitchFactory);                    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    DriverFactory::build()                       │
//! │  Parses TOML config, connects, returns capabilities             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example: Implementing a Driver Factory
//!
//! ```rust,ignore
//! use daq_core::driver::{Capability, DeviceComponents, DriverFactory};
//! use futures::future::BoxFuture;
//! use std::sync::Arc;
//!
//! pub struct Smb100aFactory;
//!
//! impl DriverFactory for Smb100aFactory {
//!     fn driver_type(&self) -> &'static str { "rs_smb100a" }
//!     fn name(&self) -> &'static str { "Rohde & Schwarz SMB100A" }
//!     fn capabilities(&self) -> &'static [Capability] { &[Capability::Parameterized] }
//!
//!     fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
//!         let _: Smb100aConfig = config.clone().try_into()?;
//!         Ok(())
//!     }
//!
//!     fn build(&self, config: toml::Value) -> BoxFuture<'static, anyhow::Result<DeviceComponents>> {
//!         Box::pin(async move {
//!             let cfg: Smb100aConfig = config.try_into()?;
//!             let driver = Arc::new(Smb100aDriver::new_async(&cfg.host, cfg.port, cfg.mock).await?);
//!             Ok(DeviceComponents::new().with_parameterized(driver))
//!         })
//!     }
//! }
//! ```

use crate::capabilities::{
    DeviceCategory, Parameterized, Routable, TraceProducer, WaveformGenerator,
};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags for device introspection.
///
/// Mirrors the capability traits as an enum for easy matching and listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Has named parameters
    /// Corresponds to [`crate::capabilities::Parameterized`]
    Parameterized,

    /// Can route signals through switches
    /// Corresponds to [`crate::capabilities::Routable`]
    Routable,

    /// Acquires sampled traces
    /// Corresponds to [`crate::capabilities::TraceProducer`]
    TraceProducer,

    /// Plays lookup-table waveforms
    /// Corresponds to [`crate::capabilities::WaveformGenerator`]
    WaveformGenerator,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Parameterized => "Parameterized",
            Self::Routable => "Routable",
            Self::TraceProducer => "Trace Producer",
            Self::WaveformGenerator => "Waveform Generator",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for capability trait objects returned by drivers.
///
/// ```rust,ignore
/// let driver = Arc::new(RedPitayaDriver::new_async(host, port, false).await?);
///
/// let components = DeviceComponents::new()
///     .with_category(DeviceCategory::Digitizer)
///     .with_trace_producer(driver.clone())
///     .with_waveform_generator(driver.clone())
///     .with_parameterized(driver);
/// ```
#[derive(Default)]
pub struct DeviceComponents {
    /// Device category for listings
    pub category: Option<DeviceCategory>,

    /// Parameterized implementation (parameter registry)
    pub parameterized: Option<Arc<dyn Parameterized>>,

    /// Routable implementation (switches)
    pub routable: Option<Arc<dyn Routable>>,

    /// TraceProducer implementation (acquisition)
    pub trace_producer: Option<Arc<dyn TraceProducer>>,

    /// WaveformGenerator implementation (LUT upload)
    pub waveform_generator: Option<Arc<dyn WaveformGenerator>>,

    /// Descriptive metadata
    pub metadata: DeviceMetadata,
}

impl DeviceComponents {
    /// Create a new empty DeviceComponents
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.parameterized.is_some() {
            caps.push(Capability::Parameterized);
        }
        if self.routable.is_some() {
            caps.push(Capability::Routable);
        }
        if self.trace_producer.is_some() {
            caps.push(Capability::TraceProducer);
        }
        if self.waveform_generator.is_some() {
            caps.push(Capability::WaveformGenerator);
        }

        caps
    }

    // Builder methods

    /// Set device category
    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Set Parameterized implementation
    pub fn with_parameterized(mut self, p: Arc<dyn Parameterized>) -> Self {
        self.parameterized = Some(p);
        self
    }

    /// Set Routable implementation
    pub fn with_routable(mut self, r: Arc<dyn Routable>) -> Self {
        self.routable = Some(r);
        self
    }

    /// Set TraceProducer implementation
    pub fn with_trace_producer(mut self, t: Arc<dyn TraceProducer>) -> Self {
        self.trace_producer = Some(t);
        self
    }

    /// Set WaveformGenerator implementation
    pub fn with_waveform_generator(mut self, w: Arc<dyn WaveformGenerator>) -> Self {
        self.waveform_generator = Some(w);
        self
    }

    /// Set device metadata
    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// =============================================================================
// Device Metadata
// =============================================================================

/// Descriptive information that isn't captured by the trait objects.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetadata {
    /// Identification string reported by the device (`*IDN?`), if any
    pub identity: Option<String>,

    /// Network endpoint or serial port the device was reached through
    pub endpoint: Option<String>,

    /// True when the device is simulated
    pub mock: bool,
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create device instances.
///
/// The factory is responsible for:
///
/// 1. Declaring what driver type it handles (matching the config `type` field)
/// 2. Validating configuration before instantiation
/// 3. Asynchronously creating the driver and returning capabilities
///
/// Factories are registered once at startup and must not hold mutable
/// state across builds.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in the config `type` field.
    ///
    /// ```toml
    /// [[instruments]]
    /// id = "source"
    /// type = "rs_smb100a"  # matches driver_type()
    /// ```
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    ///
    /// Called before `build()` to provide early error feedback.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    ///
    /// Opens the connection, validates the device identity and returns
    /// DeviceComponents with all implemented capabilities.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}
