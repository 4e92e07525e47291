//! Parameter<T> - declarative instrument parameters
//!
//! A parameter couples a typed in-memory value with its framework-facing
//! description (name, label, unit, legal values, SCPI templates) and optional
//! async hardware callbacks.
//!
//! # Data Flow
//!
//! ```text
//! param.set(value)
//!         │
//!         ▼
//! 1. Validate (read-only flag, range, choices, custom validators)
//!         │ (fails here if invalid, nothing is written)
//!         ▼
//! 2. Write to hardware (if hardware_writer set)
//!         │ (fails here if hardware error, value unchanged)
//!         ▼
//! 3. Update internal value, notify watch subscribers
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let mut frequency = Parameter::new("frequency", 1e9)
//!     .with_description("Output frequency in Hz")
//!     .with_unit("Hz")
//!     .with_range(100e3, 20e9)
//!     .with_command(CommandTemplate::new("frequency {val}Hz", "frequency?"));
//!
//! frequency.connect_to_hardware_write(move |hz| {
//!     let client = client.clone();
//!     Box::pin(async move { client.write(&format!("frequency {:.12}Hz", hz)).await })
//! });
//!
//! frequency.set(5e9).await?;
//! ```

use crate::command::CommandTemplate;
use crate::error::DaqError;
use anyhow::Result;
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

type Validator<T> = Arc<dyn Fn(&T) -> Result<(), DaqError> + Send + Sync>;
type HardwareWriter<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), DaqError>> + Send + Sync>;
type HardwareReader<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, DaqError>> + Send + Sync>;

/// Framework-facing description of a parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMetadata {
    /// Parameter name, preserved verbatim for downstream tooling
    pub name: String,
    /// Human-readable label
    pub description: Option<String>,
    /// Physical unit
    pub unit: Option<String>,
    /// Inclusive legal range, formatted for display
    pub range: Option<(String, String)>,
    /// Allowed values for enumerated parameters
    pub choices: Vec<String>,
    /// Parameter cannot be set by the user
    pub read_only: bool,
    /// SCPI set/get templates
    pub command: CommandTemplate,
}

// =============================================================================
// Parameter<T>
// =============================================================================

/// Typed parameter with optional hardware synchronization.
///
/// Clones share the same value cell, so a clone registered in a
/// [`ParameterSet`] observes every `set()` made through the driver's handle.
#[derive(Clone)]
pub struct Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    metadata: ParameterMetadata,
    value: Arc<watch::Sender<T>>,
    validators: Vec<Validator<T>>,
    hardware_writer: Option<HardwareWriter<T>>,
    hardware_reader: Option<HardwareReader<T>>,
}

impl<T> Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    /// Create new parameter with initial value
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            metadata: ParameterMetadata {
                name: name.into(),
                ..Default::default()
            },
            value: Arc::new(tx),
            validators: Vec::new(),
            hardware_writer: None,
            hardware_reader: None,
        }
    }

    /// Set parameter description (label)
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Set parameter unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.metadata.unit = Some(unit.into());
        self
    }

    /// Attach the SCPI set/get templates
    pub fn with_command(mut self, command: CommandTemplate) -> Self {
        self.metadata.command = command;
        self
    }

    /// Restrict values to the inclusive range `[min, max]`.
    ///
    /// NaN never satisfies the range.
    pub fn with_range(mut self, min: T, max: T) -> Self
    where
        T: PartialOrd + Display,
    {
        self.metadata.range = Some((min.to_string(), max.to_string()));
        let name = self.metadata.name.clone();
        self.validators.push(Arc::new(move |value: &T| {
            if min <= *value && *value <= max {
                Ok(())
            } else {
                Err(DaqError::ParameterOutOfRange {
                    name: name.clone(),
                    value: value.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                })
            }
        }));
        self
    }

    /// Restrict values to a discrete set
    pub fn with_choices(mut self, choices: Vec<T>) -> Self
    where
        T: Display,
    {
        self.metadata.choices = choices.iter().map(|c| c.to_string()).collect();
        let name = self.metadata.name.clone();
        self.validators.push(Arc::new(move |value: &T| {
            if choices.iter().any(|c| c == value) {
                Ok(())
            } else {
                Err(DaqError::ParameterInvalidChoice {
                    name: name.clone(),
                    value: format!("{:?}", value),
                })
            }
        }));
        self
    }

    /// Add a custom validation function
    pub fn with_validator(
        mut self,
        validator: impl Fn(&T) -> Result<(), DaqError> + Send + Sync + 'static,
    ) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Make parameter read-only
    pub fn read_only(mut self) -> Self {
        self.metadata.read_only = true;
        self
    }

    /// Connect hardware write function
    ///
    /// After calling this, `set()` writes to hardware before updating the
    /// internal value. If the write fails the value is left unchanged.
    pub fn connect_to_hardware_write(
        &mut self,
        writer: impl Fn(T) -> BoxFuture<'static, Result<(), DaqError>> + Send + Sync + 'static,
    ) {
        self.hardware_writer = Some(Arc::new(writer));
    }

    /// Connect hardware read function
    pub fn connect_to_hardware_read(
        &mut self,
        reader: impl Fn() -> BoxFuture<'static, Result<T, DaqError>> + Send + Sync + 'static,
    ) {
        self.hardware_reader = Some(Arc::new(reader));
    }

    /// Connect both hardware read and write functions
    pub fn connect_to_hardware(
        &mut self,
        writer: impl Fn(T) -> BoxFuture<'static, Result<(), DaqError>> + Send + Sync + 'static,
        reader: impl Fn() -> BoxFuture<'static, Result<T, DaqError>> + Send + Sync + 'static,
    ) {
        self.connect_to_hardware_write(writer);
        self.connect_to_hardware_read(reader);
    }

    /// Check a candidate value against all constraints without applying it.
    pub fn validate(&self, value: &T) -> Result<(), DaqError> {
        if self.metadata.read_only {
            return Err(DaqError::ParameterReadOnly(self.metadata.name.clone()));
        }
        for validator in &self.validators {
            validator(value)?;
        }
        Ok(())
    }

    /// Get current (cached) value
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Set value: validate, write to hardware if connected, then update.
    pub async fn set(&self, value: T) -> Result<()> {
        // Validate BEFORE hardware write so an invalid value never reaches the device
        self.validate(&value)?;

        if let Some(writer) = &self.hardware_writer {
            writer(value.clone()).await?;
        }

        self.value.send_replace(value);
        Ok(())
    }

    /// Read current value from hardware and update the cached value.
    ///
    /// Does NOT validate; the device is the source of truth.
    pub async fn read_from_hardware(&self) -> Result<T> {
        let reader = self
            .hardware_reader
            .as_ref()
            .ok_or_else(|| DaqError::ParameterNoHardwareReader(self.metadata.name.clone()))?;

        let value = reader().await?;
        self.value.send_replace(value.clone());
        Ok(value)
    }

    /// Update the cached value without validation or hardware access.
    pub fn set_cached(&self, value: T) {
        self.value.send_replace(value);
    }

    /// Subscribe to value changes
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Parameter description (label)
    pub fn description(&self) -> Option<&str> {
        self.metadata.description.as_deref()
    }

    /// Parameter unit of measurement
    pub fn unit(&self) -> Option<&str> {
        self.metadata.unit.as_deref()
    }

    /// Check if parameter is read-only
    pub fn is_read_only(&self) -> bool {
        self.metadata.read_only
    }

    /// Full metadata
    pub fn metadata(&self) -> &ParameterMetadata {
        &self.metadata
    }
}

// =============================================================================
// Type-erased access
// =============================================================================

/// Object-safe view of a parameter for generic tooling (CLI, registries).
pub trait ParameterAny: Send + Sync {
    /// Parameter name
    fn name(&self) -> &str;

    /// Framework-facing metadata
    fn metadata(&self) -> &ParameterMetadata;

    /// Current cached value rendered as text
    fn value_string(&self) -> String;

    /// Parse `raw` and set the parameter through the normal `set()` path.
    fn set_from_str<'a>(&'a self, raw: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Read the value back from hardware and return it rendered as text.
    fn refresh(&self) -> BoxFuture<'_, Result<String>>;

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

impl<T> ParameterAny for Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + Display + FromStr + 'static,
    <T as FromStr>::Err: Display,
{
    fn name(&self) -> &str {
        Parameter::name(self)
    }

    fn metadata(&self) -> &ParameterMetadata {
        Parameter::metadata(self)
    }

    fn value_string(&self) -> String {
        self.get().to_string()
    }

    fn set_from_str<'a>(&'a self, raw: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let value = raw.trim().parse::<T>().map_err(|e| {
                anyhow::anyhow!("Cannot parse '{}' for parameter '{}': {}", raw, self.name(), e)
            })?;
            self.set(value).await
        })
    }

    fn refresh(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok(self.read_from_hardware().await?.to_string()) })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// ParameterSet
// =============================================================================

/// Ordered registry of a device's parameters.
///
/// Declaration order is kept so listings match the driver's declaration.
#[derive(Default)]
pub struct ParameterSet {
    parameters: Vec<Box<dyn ParameterAny>>,
}

impl std::fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSet")
            .field("names", &self.names())
            .finish()
    }
}

impl ParameterSet {
    /// Create a new empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter. A later registration with the same name
    /// replaces the earlier one.
    pub fn register<P>(&mut self, parameter: P)
    where
        P: ParameterAny + 'static,
    {
        self.parameters.retain(|p| p.name() != parameter.name());
        self.parameters.push(Box::new(parameter));
    }

    /// Get a parameter by name as a trait object.
    pub fn get(&self, name: &str) -> Option<&dyn ParameterAny> {
        self.parameters
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Get a parameter by name with its concrete value type.
    pub fn get_typed<T>(&self, name: &str) -> Option<&Parameter<T>>
    where
        T: Clone + Send + Sync + PartialEq + Debug + 'static,
    {
        self.get(name)
            .and_then(|p| p.as_any().downcast_ref::<Parameter<T>>())
    }

    /// Iterate over all parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn ParameterAny> {
        self.parameters.iter().map(|p| p.as_ref())
    }

    /// List all parameter names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name()).collect()
    }

    /// Number of registered parameters
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn set_validates_before_hardware_write() {
        let writes = Arc::new(AtomicUsize::new(0));
        let mut power = Parameter::new("power", 0.0).with_range(-120.0, 30.0);

        let counter = writes.clone();
        power.connect_to_hardware_write(move |_value| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        assert!(power.set(31.0).await.is_err());
        assert_eq!(writes.load(Ordering::SeqCst), 0);
        assert_eq!(power.get(), 0.0);

        power.set(10.0).await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(power.get(), 10.0);
    }

    #[tokio::test]
    async fn nan_is_out_of_range() {
        let p = Parameter::new("phase", 0.0).with_range(-1.0, 1.0);
        let err = p.set(f64::NAN).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DaqError>(),
            Some(DaqError::ParameterOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn failed_hardware_write_keeps_value() {
        let mut p = Parameter::new("frequency", 1.0);
        p.connect_to_hardware_write(|_| {
            Box::pin(async { Err(DaqError::Instrument("refused".into())) })
        });
        assert!(p.set(2.0).await.is_err());
        assert_eq!(p.get(), 1.0);
    }

    #[tokio::test]
    async fn read_only_rejects_set() {
        let p = Parameter::new("data_size", 0_i64).read_only();
        let err = p.set(1).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DaqError>(),
            Some(DaqError::ParameterReadOnly(_))
        ));
    }

    #[tokio::test]
    async fn choices_are_enforced() {
        let p = Parameter::new("format_output", "ASCII".to_string())
            .with_choices(vec!["ASCII".to_string(), "BIN".to_string()]);
        assert!(p.set("BIN".to_string()).await.is_ok());
        assert!(p.set("HEX".to_string()).await.is_err());
        assert_eq!(p.metadata().choices, vec!["ASCII", "BIN"]);
    }

    #[tokio::test]
    async fn read_from_hardware_updates_cache() {
        let mut p = Parameter::new("freq_filter", 0.0);
        p.connect_to_hardware_read(|| Box::pin(async { Ok(1e6) }));
        assert_eq!(p.read_from_hardware().await.unwrap(), 1e6);
        assert_eq!(p.get(), 1e6);

        let bare = Parameter::new("nb_measure", 1_i64);
        assert!(bare.read_from_hardware().await.is_err());
    }

    #[tokio::test]
    async fn parameter_set_keeps_order_and_shares_values() {
        let freq = Parameter::new("frequency", 1e9).with_unit("Hz");
        let power = Parameter::new("power", -10.0).with_unit("dBm");

        let mut set = ParameterSet::new();
        set.register(freq.clone());
        set.register(power.clone());

        assert_eq!(set.names(), vec!["frequency", "power"]);

        freq.set(2e9).await.unwrap();
        assert_eq!(set.get("frequency").unwrap().value_string(), "2000000000");

        set.get("power").unwrap().set_from_str("-20").await.unwrap();
        assert_eq!(power.get(), -20.0);

        let typed = set.get_typed::<f64>("power").unwrap();
        assert_eq!(typed.unit(), Some("dBm"));
        assert!(set.get_typed::<i64>("power").is_none());
    }
}
