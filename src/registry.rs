//! Driver registry
//!
//! Holds the driver factories known to the application and the devices
//! built from the lab configuration. Factories are registered once at
//! startup; devices are built from [`InstrumentDefinition`]s by the
//! factory whose `driver_type` matches the instrument `type`.
//!
//! ```rust,ignore
//! let registry = DriverRegistry::new();
//! qubit_daq::register_default_factories(&registry);
//! registry.register_from_config(&config).await?;
//!
//! let switch = registry.routable(None)?;
//! switch.route("rt", "NC").await?;
//! ```

use crate::config::{InstrumentDefinition, LabConfig};
use daq_core::capabilities::{
    DeviceCategory, Parameterized, Routable, TraceProducer, WaveformGenerator,
};
use daq_core::driver::{Capability, DeviceComponents, DriverFactory};
use daq_core::error::{DaqError, DriverError, DriverErrorKind};
use dashmap::DashMap;
use std::sync::Arc;

/// A device built by a factory.
pub struct RegisteredDevice {
    /// Instrument ID from the configuration
    pub id: String,
    /// Factory driver type that built the device
    pub driver_type: String,
    /// Capability implementations
    pub components: DeviceComponents,
}

impl RegisteredDevice {
    /// Category reported by the factory, `Other` when absent.
    pub fn category(&self) -> DeviceCategory {
        self.components.category.unwrap_or_default()
    }
}

/// Summary of a registered device for listings.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: String,
    pub driver_type: String,
    pub category: DeviceCategory,
    pub capabilities: Vec<Capability>,
    pub endpoint: Option<String>,
    pub identity: Option<String>,
    pub mock: bool,
}

/// Information about a registered driver factory
#[derive(Debug, Clone)]
pub struct FactoryInfo {
    /// The driver_type string this factory handles
    pub driver_type: String,
    /// Human-readable factory name
    pub name: String,
    /// Capabilities this driver provides
    pub capabilities: Vec<Capability>,
}

/// Registry of driver factories and the devices they built.
#[derive(Default)]
pub struct DriverRegistry {
    factories: DashMap<String, Box<dyn DriverFactory>>,
    devices: DashMap<String, Arc<RegisteredDevice>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Driver Factory Management
    // =========================================================================

    /// Register a driver factory, returning the one it replaced.
    pub fn register_factory(
        &self,
        factory: Box<dyn DriverFactory>,
    ) -> Option<Box<dyn DriverFactory>> {
        let driver_type = factory.driver_type().to_string();
        tracing::info!(
            driver_type = %driver_type,
            name = %factory.name(),
            capabilities = ?factory.capabilities(),
            "Registering driver factory"
        );
        self.factories.insert(driver_type, factory)
    }

    /// Check if a factory is registered for a driver type.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Registered driver types, sorted.
    pub fn list_factories(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    /// Get factory information for introspection.
    pub fn factory_info(&self, driver_type: &str) -> Option<FactoryInfo> {
        self.factories.get(driver_type).map(|entry| {
            let factory = entry.value();
            FactoryInfo {
                driver_type: factory.driver_type().to_string(),
                name: factory.name().to_string(),
                capabilities: factory.capabilities().to_vec(),
            }
        })
    }

    // =========================================================================
    // Device Registration
    // =========================================================================

    /// Validate one instrument definition against its factory without
    /// building anything.
    pub fn validate(&self, instrument: &InstrumentDefinition) -> Result<(), DaqError> {
        let factory = self.factories.get(&instrument.r#type).ok_or_else(|| {
            DaqError::Configuration(format!(
                "No factory registered for driver_type '{}'. Available factories: {:?}",
                instrument.r#type,
                self.list_factories()
            ))
        })?;

        factory.validate(&instrument.config).map_err(|e| {
            DaqError::Driver(DriverError::new(
                instrument.r#type.as_str(),
                DriverErrorKind::Configuration,
                format!(
                    "Configuration validation failed for device '{}' ({}): {:#}",
                    instrument.id, instrument.r#type, e
                ),
            ))
        })
    }

    /// Validate and build one instrument, then register the device.
    pub async fn register(&self, instrument: &InstrumentDefinition) -> Result<(), DaqError> {
        if self.devices.contains_key(&instrument.id) {
            return Err(DaqError::Configuration(format!(
                "Device '{}' is already registered",
                instrument.id
            )));
        }
        self.validate(instrument)?;

        tracing::info!(
            device_id = %instrument.id,
            driver_type = %instrument.r#type,
            "Building device from factory"
        );

        // The DashMap guard must not be held across the build.
        let build = match self.factories.get(&instrument.r#type) {
            Some(factory) => factory.build(instrument.config.clone()),
            None => {
                return Err(DaqError::Configuration(format!(
                    "No factory registered for driver_type '{}'",
                    instrument.r#type
                )))
            }
        };

        let components = build.await.map_err(|e| {
            DaqError::Driver(DriverError::new(
                instrument.r#type.as_str(),
                DriverErrorKind::Initialization,
                format!(
                    "Factory build failed for device '{}' ({}): {:#}",
                    instrument.id, instrument.r#type, e
                ),
            ))
        })?;

        tracing::debug!(
            device_id = %instrument.id,
            capabilities = ?components.capabilities(),
            "Device built"
        );

        self.devices.insert(
            instrument.id.clone(),
            Arc::new(RegisteredDevice {
                id: instrument.id.clone(),
                driver_type: instrument.r#type.clone(),
                components,
            }),
        );
        tracing::info!(device_id = %instrument.id, "Device registered successfully");
        Ok(())
    }

    /// Register every enabled instrument of `config`.
    ///
    /// All definitions are validated before the first device is built, so a
    /// configuration error never leaves a partially connected lab behind.
    pub async fn register_from_config(&self, config: &LabConfig) -> Result<usize, DaqError> {
        config.validate().map_err(DaqError::Configuration)?;

        let enabled = config.enabled_instruments();
        for instrument in &enabled {
            self.validate(instrument)?;
        }
        for instrument in &enabled {
            self.register(instrument).await?;
        }
        Ok(enabled.len())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Get a registered device by ID.
    pub fn get(&self, id: &str) -> Option<Arc<RegisteredDevice>> {
        self.devices.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when no device is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Registered devices sorted by ID.
    pub fn devices(&self) -> Vec<Arc<RegisteredDevice>> {
        let mut devices: Vec<_> = self
            .devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Listing summary of every registered device.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.devices()
            .iter()
            .map(|device| DeviceInfo {
                id: device.id.clone(),
                driver_type: device.driver_type.clone(),
                category: device.category(),
                capabilities: device.components.capabilities(),
                endpoint: device.components.metadata.endpoint.clone(),
                identity: device.components.metadata.identity.clone(),
                mock: device.components.metadata.mock,
            })
            .collect()
    }

    /// The device `id`, or the only device providing `what` when `id` is None.
    fn select(
        &self,
        id: Option<&str>,
        what: &str,
        provides: impl Fn(&RegisteredDevice) -> bool,
    ) -> Result<Arc<RegisteredDevice>, DaqError> {
        if let Some(id) = id {
            let device = self
                .get(id)
                .ok_or_else(|| DaqError::Configuration(format!("Unknown device '{}'", id)))?;
            if !provides(&device) {
                return Err(DaqError::Configuration(format!(
                    "Device '{}' is not a {}",
                    id, what
                )));
            }
            return Ok(device);
        }

        let mut candidates: Vec<_> = self
            .devices()
            .into_iter()
            .filter(|device| provides(device))
            .collect();
        match candidates.len() {
            0 => Err(DaqError::Configuration(format!(
                "No {} is configured",
                what
            ))),
            1 => Ok(candidates.remove(0)),
            _ => Err(DaqError::Configuration(format!(
                "Several devices are a {}; pick one of {:?}",
                what,
                candidates.iter().map(|d| d.id.as_str()).collect::<Vec<_>>()
            ))),
        }
    }

    /// Switch routing implementation.
    pub fn routable(&self, id: Option<&str>) -> Result<Arc<dyn Routable>, DaqError> {
        let device = self.select(id, "switch", |d| d.components.routable.is_some())?;
        device
            .components
            .routable
            .clone()
            .ok_or_else(|| DaqError::Configuration(format!("Device '{}' has no switches", device.id)))
    }

    /// Parameters of a signal source.
    pub fn signal_source(&self, id: Option<&str>) -> Result<Arc<dyn Parameterized>, DaqError> {
        let device = self.select(id, "signal source", |d| {
            d.category() == DeviceCategory::SignalSource && d.components.parameterized.is_some()
        })?;
        parameters_of(&device)
    }

    /// Parameters of any device.
    pub fn parameterized(&self, id: &str) -> Result<Arc<dyn Parameterized>, DaqError> {
        let device = self.select(Some(id), "parameterized device", |d| {
            d.components.parameterized.is_some()
        })?;
        parameters_of(&device)
    }

    /// Trace acquisition implementation.
    pub fn trace_producer(&self, id: Option<&str>) -> Result<Arc<dyn TraceProducer>, DaqError> {
        let device = self.select(id, "digitizer", |d| d.components.trace_producer.is_some())?;
        device.components.trace_producer.clone().ok_or_else(|| {
            DaqError::Configuration(format!("Device '{}' produces no traces", device.id))
        })
    }

    /// LUT upload implementation.
    pub fn waveform_generator(
        &self,
        id: Option<&str>,
    ) -> Result<Arc<dyn WaveformGenerator>, DaqError> {
        let device = self.select(id, "waveform generator", |d| {
            d.components.waveform_generator.is_some()
        })?;
        device.components.waveform_generator.clone().ok_or_else(|| {
            DaqError::Configuration(format!("Device '{}' generates no waveforms", device.id))
        })
    }
}

fn parameters_of(device: &RegisteredDevice) -> Result<Arc<dyn Parameterized>, DaqError> {
    device.components.parameterized.clone().ok_or_else(|| {
        DaqError::Configuration(format!("Device '{}' has no parameters", device.id))
    })
}
