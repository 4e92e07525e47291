//! Red Pitaya IQ Driver
//!
//! Driver for Red Pitaya STEMlab boards running the IQ demodulation FPGA
//! design and its SCPI server (TCP port 5000, `\r\n` terminated).
//!
//! # Parameters
//!
//! - `freq_filter` - low-pass filter cut-off (Hz)
//! - `decimation_filter` - decimated points
//! - `start_ADC` / `stop_ADC` - acquisition window (s, sent as samples)
//! - `stop_DAC` - lookup-table length (s, sent as samples)
//! - `period` - repetition period (s, sent as samples)
//! - `mode_output` - `ADC`, `IQCH1`, `IQCH2`, `IQLP1` or `IQINT`
//! - `format_output` - `ASCII` or `BIN`
//! - `status` - `start` / `stop`
//! - `nb_measure`, `pulse_zero`, `length_time` - host-side settings
//! - `data_size` (read-only) - samples currently buffered

use crate::acquisition::{
    demultiplex, AcquisitionError, DataFormat, FramePoller, OutputMode, RetryBudget,
    RetryConfig, Status, Traces, DATA_QUERY,
};
use crate::lut::{
    fill_lut, format_codes, pack_dac_codes, pack_iq_codes, Channel, LutError, Quadrature,
    Trigger,
};
use crate::mock::MockRedPitaya;
use crate::timing::{
    get_samples_from_sec, get_sec_from_samples, ACQUIRE_SETTLE, CONVERSION_SETTLE, LUT_DEPTH,
    LUT_SETTLE, SAMPLE_PERIOD, STATUS_SETTLE,
};
use crate::views::{self, setpoint_axis, View, ViewValue};
use anyhow::{Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{DeviceCategory, Parameterized, TraceProducer, WaveformGenerator};
use daq_core::command::{fixed12, CommandTemplate};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::error::DaqError;
use daq_core::parameter::{Parameter, ParameterSet};
use daq_core::scpi::{
    bind_parameter, decode_f64, decode_i64, ScpiClient, ScpiOps, Terminator, WireCodec,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default SCPI port of the IQ server
pub const DEFAULT_PORT: u16 = 5000;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Red Pitaya IQ driver
#[derive(Debug, Clone, Deserialize)]
pub struct RedPitayaConfig {
    /// Hostname or IP address of the Red Pitaya
    pub host: String,

    /// SCPI port (default: 5000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable mock mode for testing without hardware
    #[serde(default)]
    pub mock: bool,

    /// Frames per acquisition (default: 1)
    #[serde(default = "default_nb_measure")]
    pub nb_measure: usize,

    /// Limits of one acquisition call
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_nb_measure() -> usize {
    1
}

// =============================================================================
// Wire codecs
// =============================================================================

fn float_codec() -> WireCodec<f64> {
    WireCodec::new(|v: &f64| Ok(fixed12(*v)), decode_f64)
}

/// Seconds on the user side, sample counts on the wire.
fn seconds_codec(fixed_point: bool) -> WireCodec<f64> {
    WireCodec::new(
        move |sec: &f64| {
            let samples = get_samples_from_sec(*sec);
            Ok(if fixed_point {
                fixed12(samples as f64)
            } else {
                samples.to_string()
            })
        },
        |reply: &str| decode_i64(reply).map(get_sec_from_samples),
    )
    .with_settle(CONVERSION_SETTLE)
}

fn keyword_codec<T>(as_str: fn(&T) -> &'static str) -> WireCodec<T>
where
    T: std::str::FromStr<Err = String> + 'static,
{
    WireCodec::new(
        move |v: &T| Ok(as_str(v).to_string()),
        |reply: &str| reply.trim().parse::<T>().map_err(DaqError::Instrument),
    )
}

fn at_least<T>(name: &'static str, min: T) -> impl Fn(&T) -> Result<(), DaqError>
where
    T: PartialOrd + std::fmt::Display,
{
    move |value: &T| {
        if *value >= min {
            Ok(())
        } else {
            Err(DaqError::ParameterOutOfRange {
                name: name.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: "inf".to_string(),
            })
        }
    }
}

// =============================================================================
// RedPitayaDriver
// =============================================================================

/// Driver for the Red Pitaya IQ acquisition/generation board.
///
/// # Example
///
/// ```rust,ignore
/// let driver = RedPitayaDriver::new_async("192.168.1.50", 5000, false).await?;
///
/// driver.mode_output().set(OutputMode::IqInt).await?;
/// driver.nb_measure().set(200).await?;
/// let traces = driver.get_data().await?;
/// ```
pub struct RedPitayaDriver {
    client: Arc<dyn ScpiOps>,
    params: ParameterSet,
    budget: RetryBudget,

    /// One acquisition at a time; they share the device's run state.
    acquisition: Mutex<()>,

    freq_filter: Parameter<f64>,
    decimation_filter: Parameter<i64>,
    start_adc: Parameter<f64>,
    stop_adc: Parameter<f64>,
    stop_dac: Parameter<f64>,
    period: Parameter<f64>,
    mode_output: Parameter<OutputMode>,
    format_output: Parameter<DataFormat>,
    status: Parameter<Status>,
    nb_measure: Parameter<usize>,
    pulse_zero: Parameter<f64>,
    length_time: Parameter<usize>,
    data_size: Parameter<i64>,
}

impl RedPitayaDriver {
    /// Create a new driver with hardware connection.
    ///
    /// # Arguments
    /// * `host` - Hostname or IP address
    /// * `port` - SCPI port (typically 5000)
    /// * `mock` - If true, use a simulated board
    pub async fn new_async(host: &str, port: u16, mock: bool) -> Result<Arc<Self>> {
        let client = connect_client(host, port, mock).await?;
        let (driver, identity) = Self::identified(client).await?;
        tracing::info!("Red Pitaya IQ driver initialized: {} (mock={})", identity, mock);
        Ok(Arc::new(driver))
    }

    /// Build a driver around `client` and validate it; returns the driver
    /// together with its `*IDN?` reply.
    pub async fn identified(client: Arc<dyn ScpiOps>) -> Result<(Self, String)> {
        let driver = Self::with_client(client);
        let identity = driver.identify().await?;
        Ok((driver, identity))
    }

    /// Build a driver around an existing client. No I/O happens here.
    pub fn with_client(client: Arc<dyn ScpiOps>) -> Self {
        let max_adc = 8191.0 * SAMPLE_PERIOD;
        let max_dac = LUT_DEPTH as f64 * SAMPLE_PERIOD;

        let mut freq_filter = Parameter::new("freq_filter", 1e6)
            .with_description("Low pass filter cut-off freq")
            .with_unit("Hz")
            .with_range(10e3, 62.5e6)
            .with_command(CommandTemplate::new("FILTER:FREQ {val}", "FILTER:FREQ?"));
        bind_parameter(&mut freq_filter, client.clone(), float_codec());

        let mut decimation_filter = Parameter::new("decimation_filter", 100_i64)
            .with_description("Decimated points")
            .with_range(10, 65535)
            .with_command(CommandTemplate::new("FILTER:DEC {val}", "FILTER:DEC?"));
        bind_parameter(
            &mut decimation_filter,
            client.clone(),
            WireCodec::new(|v: &i64| Ok(fixed12(*v as f64)), decode_i64),
        );

        let mut start_adc = Parameter::new("start_ADC", 0.0)
            .with_description("Acquisition starting time")
            .with_unit("s")
            .with_range(0.0, max_adc)
            .with_command(CommandTemplate::new("ADC:STARTPOS {val}", "ADC:STARTPOS?"));
        bind_parameter(&mut start_adc, client.clone(), seconds_codec(false));

        let mut stop_adc = Parameter::new("stop_ADC", 0.0)
            .with_description("Acquisition stopping time")
            .with_unit("s")
            .with_range(0.0, max_adc)
            .with_command(CommandTemplate::new("ADC:STOPPOS {val}", "ADC:STOPPOS?"));
        bind_parameter(&mut stop_adc, client.clone(), seconds_codec(true));

        let mut stop_dac = Parameter::new("stop_DAC", max_dac)
            .with_description("Stopping time of the LUT")
            .with_unit("s")
            .with_range(0.0, max_dac)
            .with_command(CommandTemplate::new("DAC:STOPPOS {val}", "DAC:STOPPOS?"));
        bind_parameter(&mut stop_dac, client.clone(), seconds_codec(true));

        let mut period = Parameter::new("period", 0.0)
            .with_description("Period")
            .with_unit("s")
            .with_range(0.0, 1.0)
            .with_command(CommandTemplate::new("PERIOD {val}", "PERIOD?"));
        bind_parameter(&mut period, client.clone(), seconds_codec(false));

        let mut mode_output = Parameter::new("mode_output", OutputMode::Adc)
            .with_description("Output mode")
            .with_choices(OutputMode::ALL.to_vec())
            .with_command(CommandTemplate::new("OUTPUT:SELECT {val}", "OUTPUT:SELECT?"));
        bind_parameter(&mut mode_output, client.clone(), keyword_codec(OutputMode::as_str));

        let mut format_output = Parameter::new("format_output", DataFormat::Ascii)
            .with_description("Output format")
            .with_choices(vec![DataFormat::Ascii, DataFormat::Bin])
            .with_command(CommandTemplate::new("OUTPUT:FORMAT {val}", "OUTPUT:FORMAT?"));
        bind_parameter(&mut format_output, client.clone(), keyword_codec(DataFormat::as_str));

        let mut status = Parameter::new("status", Status::Stop)
            .with_description("Acquisition run state")
            .with_choices(vec![Status::Start, Status::Stop])
            .with_command(CommandTemplate::set_only("{val}"));
        bind_parameter(
            &mut status,
            client.clone(),
            keyword_codec(Status::as_str).with_settle(STATUS_SETTLE),
        );

        let nb_measure = Parameter::new("nb_measure", 1_usize)
            .with_description("Frames per acquisition")
            .with_validator(at_least("nb_measure", 1));

        let pulse_zero = Parameter::new("pulse_zero", 0.0)
            .with_description("First index of the setpoint axes")
            .with_validator(at_least("pulse_zero", 0.0));

        let length_time = Parameter::new("length_time", 0_usize)
            .with_description("Total number of data points of a trace");

        let mut data_size = Parameter::new("data_size", 0_i64)
            .with_description("Buffered samples")
            .with_command(CommandTemplate::get_only("OUTPUT:DATASIZE?"))
            .read_only();
        bind_parameter(
            &mut data_size,
            client.clone(),
            WireCodec::new(|v: &i64| Ok(v.to_string()), decode_i64),
        );

        let mut params = ParameterSet::new();
        params.register(freq_filter.clone());
        params.register(decimation_filter.clone());
        params.register(start_adc.clone());
        params.register(stop_adc.clone());
        params.register(stop_dac.clone());
        params.register(period.clone());
        params.register(mode_output.clone());
        params.register(format_output.clone());
        params.register(status.clone());
        params.register(nb_measure.clone());
        params.register(pulse_zero.clone());
        params.register(length_time.clone());
        params.register(data_size.clone());

        Self {
            client,
            params,
            budget: RetryBudget::default(),
            acquisition: Mutex::new(()),
            freq_filter,
            decimation_filter,
            start_adc,
            stop_adc,
            stop_dac,
            period,
            mode_output,
            format_output,
            status,
            nb_measure,
            pulse_zero,
            length_time,
            data_size,
        }
    }

    /// Replace the retry budget used by [`get_data`](Self::get_data).
    pub fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Retry budget used by [`get_data`](Self::get_data).
    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Query `*IDN?`; used to validate the connection.
    pub async fn identify(&self) -> Result<String> {
        let idn = self.client.query("*IDN?").await?;
        tracing::debug!("Validated connection: {}", idn);
        Ok(idn)
    }

    // =========================================================================
    // Lookup tables
    // =========================================================================

    /// Upload `table` to a DAC channel with trigger tag `trigger`.
    ///
    /// # Returns
    /// Number of samples written.
    pub async fn send_dac_lut(
        &self,
        table: &[f64],
        channel: Channel,
        trigger: Trigger,
    ) -> Result<usize> {
        check_depth("DAC", table)?;
        tracing::info!(%channel, %trigger, samples = table.len(), "Red Pitaya: sending DAC LUT");

        let codes = format_codes(&pack_dac_codes(table, trigger));
        tokio::time::sleep(LUT_SETTLE).await;
        self.client
            .write(&format!("DAC:{} {}", channel, codes))
            .await?;
        Ok(table.len())
    }

    /// [`send_dac_lut`](Self::send_dac_lut) with textual channel and trigger.
    /// Nothing is written if either fails to parse.
    pub async fn send_dac_lut_str(
        &self,
        table: &[f64],
        channel: &str,
        trigger: &str,
    ) -> Result<usize> {
        let channel: Channel = channel.parse()?;
        let trigger: Trigger = trigger.parse()?;
        self.send_dac_lut(table, channel, trigger).await
    }

    /// Upload `table` as the `quadrature` reference of ADC `channel`.
    pub async fn send_iq_lut(
        &self,
        table: &[f64],
        channel: Channel,
        quadrature: Quadrature,
    ) -> Result<usize> {
        check_depth("IQ", table)?;
        tracing::info!(%channel, %quadrature, samples = table.len(), "Red Pitaya: sending IQ LUT");

        let codes = format_codes(&pack_iq_codes(table));
        tokio::time::sleep(LUT_SETTLE).await;
        self.client
            .write(&format!("{}:{} {}", quadrature, channel, codes))
            .await?;
        Ok(table.len())
    }

    /// [`send_iq_lut`](Self::send_iq_lut) with textual channel and quadrature.
    pub async fn send_iq_lut_str(
        &self,
        table: &[f64],
        channel: &str,
        quadrature: &str,
    ) -> Result<usize> {
        let channel: Channel = channel.parse()?;
        let quadrature: Quadrature = quadrature.parse()?;
        self.send_iq_lut(table, channel, quadrature).await
    }

    /// Zero `duration` seconds of every table: both DACs and all four IQ
    /// references. `stop_DAC` is set to `duration` first.
    ///
    /// Pass [`max_lut_duration()`](crate::timing::max_lut_duration) to clear
    /// the whole table.
    pub async fn reset_lut(&self, duration: f64) -> Result<()> {
        tracing::info!(duration, "Red Pitaya: resetting all LUTs");
        let empty = fill_lut("SIN", &[0.0, 0.0, duration, 0.0])?;

        self.stop_dac.set(duration).await?;
        for channel in Channel::ALL {
            self.send_dac_lut(&empty, channel, Trigger::None).await?;
        }
        for channel in Channel::ALL {
            for quadrature in Quadrature::ALL {
                self.send_iq_lut(&empty, channel, quadrature).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Acquire `nb_measure` frames with the driver's retry budget.
    pub async fn get_data(&self) -> Result<Traces, AcquisitionError> {
        self.get_data_with(self.budget).await
    }

    /// Acquire `nb_measure` frames within `budget`.
    pub async fn get_data_with(&self, budget: RetryBudget) -> Result<Traces, AcquisitionError> {
        let _guard = self.acquisition.lock().await;
        tokio::time::sleep(ACQUIRE_SETTLE).await;

        let nb_measure = self.nb_measure.get();
        let mode = self.read_mode().await?;
        let (start, stop) = self.read_window().await?;
        let single_trace = stop - start;
        if single_trace <= 0 && mode.is_integrating() {
            return Err(AcquisitionError::InvalidWindow { start, stop });
        }

        self.format_output
            .set(DataFormat::Ascii)
            .await
            .map_err(|e| AcquisitionError::transport("configuration", e))?;

        let result = FramePoller::new(self.client.as_ref(), budget)
            .collect(nb_measure)
            .await;
        self.status.set_cached(Status::Stop);
        let (signal, stats) = result?;

        tracing::info!(
            mode = %mode,
            frames = stats.frames,
            samples = stats.samples,
            polls = stats.polls,
            buffer_faults = stats.buffer_faults,
            "Red Pitaya: acquisition complete"
        );

        Ok(demultiplex(&signal, mode, single_trace.max(1) as usize))
    }

    /// One frame of one data chunk, without normalization by trace length.
    ///
    /// `ADC`, `IQCH1` and `IQCH2` pulses are all split two ways. Matching
    /// on `ADC` alone would send `IQCH1`/`IQCH2` pulses down the four-way
    /// split and interleave unrelated samples.
    pub async fn get_single_pulse(&self) -> Result<Traces, AcquisitionError> {
        let _guard = self.acquisition.lock().await;

        self.format_output
            .set(DataFormat::Ascii)
            .await
            .map_err(|e| AcquisitionError::transport("configuration", e))?;

        let result = FramePoller::new(self.client.as_ref(), self.budget)
            .collect_single()
            .await;
        self.status.set_cached(Status::Stop);
        let (signal, _stats) = result?;

        let mode = self.read_mode().await?;
        Ok(demultiplex(&signal, mode, 1))
    }

    /// Acquire and reduce to one derived view.
    pub async fn view(&self, view: View) -> Result<ViewValue, AcquisitionError> {
        if let Some(settle) = view.settle() {
            tokio::time::sleep(settle).await;
        }
        let traces = self.get_data().await?;
        view.compute(&traces)
    }

    /// Read and discard one data reply; returns it.
    ///
    /// Useful to clear an `ERR!` state of the data server.
    pub async fn reset(&self) -> Result<String> {
        self.client.query(DATA_QUERY).await
    }

    async fn read_mode(&self) -> Result<OutputMode, AcquisitionError> {
        self.mode_output
            .read_from_hardware()
            .await
            .map_err(|e| AcquisitionError::transport("configuration", e))
    }

    async fn read_window(&self) -> Result<(i64, i64), AcquisitionError> {
        let start = self
            .start_adc
            .read_from_hardware()
            .await
            .map_err(|e| AcquisitionError::transport("configuration", e))?;
        let stop = self
            .stop_adc
            .read_from_hardware()
            .await
            .map_err(|e| AcquisitionError::transport("configuration", e))?;
        Ok((get_samples_from_sec(start), get_samples_from_sec(stop)))
    }

    // =========================================================================
    // Setpoint axes
    // =========================================================================

    /// Trace index axis of the `*_INT` views.
    pub fn pulse_axis(&self) -> Vec<f64> {
        let nb = self.nb_measure.get();
        setpoint_axis(self.pulse_zero.get(), nb as f64, nb)
    }

    /// Sample index axis of the `ADC*`, `I*` and `Q*` views.
    pub fn time_axis(&self) -> Vec<f64> {
        let len = self.length_time.get();
        setpoint_axis(self.pulse_zero.get(), len as f64, len)
    }

    /// Channel index axis of `ADC_power`.
    pub fn channel_axis(&self) -> Vec<f64> {
        views::channel_axis()
    }

    // =========================================================================
    // Parameter Accessors
    // =========================================================================

    pub fn freq_filter(&self) -> &Parameter<f64> {
        &self.freq_filter
    }

    pub fn decimation_filter(&self) -> &Parameter<i64> {
        &self.decimation_filter
    }

    /// `start_ADC`
    pub fn start_adc(&self) -> &Parameter<f64> {
        &self.start_adc
    }

    /// `stop_ADC`
    pub fn stop_adc(&self) -> &Parameter<f64> {
        &self.stop_adc
    }

    /// `stop_DAC`
    pub fn stop_dac(&self) -> &Parameter<f64> {
        &self.stop_dac
    }

    pub fn period(&self) -> &Parameter<f64> {
        &self.period
    }

    pub fn mode_output(&self) -> &Parameter<OutputMode> {
        &self.mode_output
    }

    pub fn format_output(&self) -> &Parameter<DataFormat> {
        &self.format_output
    }

    pub fn status(&self) -> &Parameter<Status> {
        &self.status
    }

    pub fn nb_measure(&self) -> &Parameter<usize> {
        &self.nb_measure
    }

    pub fn pulse_zero(&self) -> &Parameter<f64> {
        &self.pulse_zero
    }

    pub fn length_time(&self) -> &Parameter<usize> {
        &self.length_time
    }

    pub fn data_size(&self) -> &Parameter<i64> {
        &self.data_size
    }
}

fn check_depth(kind: &'static str, table: &[f64]) -> Result<(), LutError> {
    if table.len() > LUT_DEPTH {
        return Err(LutError::TooManySamples {
            kind,
            samples: table.len(),
            max: LUT_DEPTH,
        });
    }
    Ok(())
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl Parameterized for RedPitayaDriver {
    fn parameters(&self) -> &ParameterSet {
        &self.params
    }
}

#[async_trait]
impl TraceProducer for RedPitayaDriver {
    async fn read_traces(&self) -> Result<Vec<Vec<f64>>> {
        Ok(self.get_data().await?.into_channels())
    }

    async fn channel_labels(&self) -> Result<Vec<String>> {
        let mode = self.read_mode().await?;
        Ok(mode
            .channel_labels()
            .iter()
            .map(|l| l.to_string())
            .collect())
    }
}

#[async_trait]
impl WaveformGenerator for RedPitayaDriver {
    async fn load_waveform(
        &self,
        kind: &str,
        params: &[f64],
        channel: &str,
        trigger: &str,
    ) -> Result<usize> {
        let channel: Channel = channel.parse()?;
        let trigger: Trigger = trigger.parse()?;
        let table = fill_lut(kind, params)?;
        self.send_dac_lut(&table, channel, trigger).await
    }
}

// =============================================================================
// RedPitayaFactory
// =============================================================================

/// Factory for creating Red Pitaya IQ driver instances.
pub struct RedPitayaFactory;

static RED_PITAYA_CAPABILITIES: &[Capability] = &[
    Capability::Parameterized,
    Capability::TraceProducer,
    Capability::WaveformGenerator,
];

impl DriverFactory for RedPitayaFactory {
    fn driver_type(&self) -> &'static str {
        "red_pitaya_iq"
    }

    fn name(&self) -> &'static str {
        "Red Pitaya IQ Acquisition/Generation"
    }

    fn capabilities(&self) -> &'static [Capability] {
        RED_PITAYA_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: RedPitayaConfig = config
            .clone()
            .try_into()
            .context("Invalid Red Pitaya config")?;

        if cfg.host.is_empty() {
            anyhow::bail!("'host' field cannot be empty");
        }
        if cfg.port == 0 {
            anyhow::bail!("'port' field cannot be 0");
        }
        if cfg.nb_measure == 0 {
            anyhow::bail!("'nb_measure' must be at least 1");
        }
        if !cfg.retry.deadline_secs.is_finite() || cfg.retry.deadline_secs < 0.0 {
            anyhow::bail!("'retry.deadline_secs' must be a non-negative number");
        }

        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: RedPitayaConfig = config.try_into().context("Invalid Red Pitaya config")?;

            let client = connect_client(&cfg.host, cfg.port, cfg.mock).await?;
            build_components(client, &cfg).await
        })
    }
}

async fn connect_client(host: &str, port: u16, mock: bool) -> Result<Arc<dyn ScpiOps>> {
    if mock {
        tracing::info!("Creating mock Red Pitaya IQ driver");
        return Ok(Arc::new(MockRedPitaya::new()));
    }
    tracing::info!("Connecting to Red Pitaya at {}:{}", host, port);
    let client = ScpiClient::connect(host, port, Terminator::CrLf)
        .await
        .with_context(|| format!("Red Pitaya at {}:{}", host, port))?;
    Ok(Arc::new(client))
}

async fn build_components(
    client: Arc<dyn ScpiOps>,
    cfg: &RedPitayaConfig,
) -> Result<DeviceComponents> {
    let (driver, identity) = RedPitayaDriver::identified(client).await?;
    tracing::info!("Red Pitaya IQ driver initialized: {} (mock={})", identity, cfg.mock);
    let driver = driver.with_budget(cfg.retry.clone().into());
    driver.nb_measure().set(cfg.nb_measure).await?;
    let driver = Arc::new(driver);

    Ok(DeviceComponents::new()
        .with_category(DeviceCategory::Digitizer)
        .with_trace_producer(driver.clone())
        .with_waveform_generator(driver.clone())
        .with_parameterized(driver)
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

    fn mock_driver() -> (Arc<MockRedPitaya>, RedPitayaDriver) {
        let mock = Arc::new(MockRedPitaya::new());
        let driver = RedPitayaDriver::with_client(mock.clone());
        (mock, driver)
    }

    #[test]
    fn test_factory_driver_type() {
        let factory = RedPitayaFactory;
        assert_eq!(factory.driver_type(), "red_pitaya_iq");
        assert!(factory.capabilities().contains(&Capability::TraceProducer));
        assert!(factory.capabilities().contains(&Capability::WaveformGenerator));
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = RedPitayaFactory;

        let valid = toml::Value::Table(toml::toml! {
            host = "192.168.1.50"
        });
        assert!(factory.validate(&valid).is_ok());

        let full = toml::Value::Table(toml::toml! {
            host = "192.168.1.50"
            port = 5000
            mock = true
            nb_measure = 100

            [retry]
            max_buffer_faults = 3
            deadline_secs = 5.0
        });
        assert!(factory.validate(&full).is_ok());

        let empty_host = toml::Value::Table(toml::toml! {
            host = ""
        });
        assert!(factory.validate(&empty_host).is_err());

        let zero_frames = toml::Value::Table(toml::toml! {
            host = "192.168.1.50"
            nb_measure = 0
        });
        assert!(factory.validate(&zero_frames).is_err());

        let negative_deadline = toml::Value::Table(toml::toml! {
            host = "192.168.1.50"
            [retry]
            deadline_secs = -1.0
        });
        assert!(factory.validate(&negative_deadline).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_build_mock() {
        let config = toml::Value::Table(toml::toml! {
            host = "192.168.1.50"
            mock = true
            nb_measure = 7
            [retry]
            max_buffer_faults = 2
        });

        let components = RedPitayaFactory.build(config).await.unwrap();
        assert!(components.trace_producer.is_some());
        assert!(components.waveform_generator.is_some());
        assert!(components.metadata.mock);

        let params = components.parameterized.unwrap();
        assert_eq!(params.parameters().get("nb_measure").unwrap().value_string(), "7");
    }

    #[tokio::test]
    async fn test_factory_build_identifies_once() {
        let cfg: RedPitayaConfig = toml::Value::Table(toml::toml! {
            host = "192.168.1.50"
            mock = true
        })
        .try_into()
        .unwrap();
        let mock = Arc::new(MockRedPitaya::new());

        let components = build_components(mock.clone(), &cfg).await.unwrap();
        assert!(components.metadata.identity.unwrap().starts_with("REDPITAYA"));

        let idn_queries = mock.queries().await.iter().filter(|q| *q == "*IDN?").count();
        assert_eq!(idn_queries, 1);
    }

    #[test]
    fn test_parameters_registered_in_order() {
        let (_mock, driver) = mock_driver();
        assert_eq!(
            driver.parameters().names(),
            vec![
                "freq_filter",
                "decimation_filter",
                "start_ADC",
                "stop_ADC",
                "stop_DAC",
                "period",
                "mode_output",
                "format_output",
                "status",
                "nb_measure",
                "pulse_zero",
                "length_time",
                "data_size",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameter_wire_format() {
        let (mock, driver) = mock_driver();

        driver.freq_filter().set(2e6).await.unwrap();
        driver.decimation_filter().set(125).await.unwrap();
        driver.start_adc().set(800e-9).await.unwrap();
        driver.stop_adc().set(1.6e-6).await.unwrap();
        driver.period().set(1e-3).await.unwrap();
        driver.mode_output().set(OutputMode::IqInt).await.unwrap();
        driver.status().set(Status::Start).await.unwrap();

        assert_eq!(
            mock.writes().await,
            vec![
                "FILTER:FREQ 2000000.000000000000",
                "FILTER:DEC 125.000000000000",
                "ADC:STARTPOS 100",
                "ADC:STOPPOS 200.000000000000",
                "PERIOD 125000",
                "OUTPUT:SELECT IQINT",
                "start",
            ]
        );

        let stop = driver.stop_adc().read_from_hardware().await.unwrap();
        assert!((stop - 1.6e-6).abs() < 1e-15);
        assert_eq!(
            driver.mode_output().read_from_hardware().await.unwrap(),
            OutputMode::IqInt
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_values_never_reach_device() {
        let (mock, driver) = mock_driver();

        assert!(driver.freq_filter().set(5e3).await.is_err());
        assert!(driver.start_adc().set(8192.0 * SAMPLE_PERIOD).await.is_err());
        assert!(driver.nb_measure().set(0).await.is_err());
        assert!(driver.pulse_zero().set(-1.0).await.is_err());
        assert!(driver.data_size().set(3).await.is_err());
        assert!(mock.writes().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_dac_lut_packs_trigger_bits() {
        let (mock, driver) = mock_driver();

        let written = driver
            .send_dac_lut(&[1.9, -2.7, 0.0], Channel::Ch2, Trigger::Both)
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(mock.writes().await, vec!["DAC:CH2 7, -5, 3"]);
        assert_eq!(mock.table("DAC:CH2").await, Some(vec![7, -5, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_addressing_fails_before_write() {
        let (mock, driver) = mock_driver();

        assert!(driver.send_dac_lut_str(&[1.0], "CH3", "NONE").await.is_err());
        assert!(driver.send_dac_lut_str(&[1.0], "CH1", "ALL").await.is_err());
        assert!(driver.send_iq_lut_str(&[1.0], "CH1", "X").await.is_err());
        assert!(driver
            .load_waveform("TRIANGLE", &[1.0, 1.0, 1e-6, 0.0], "CH1", "NONE")
            .await
            .is_err());
        assert!(driver
            .send_dac_lut(&vec![0.0; LUT_DEPTH + 1], Channel::Ch1, Trigger::None)
            .await
            .is_err());
        assert!(mock.writes().await.is_empty());

        driver.send_iq_lut_str(&[2.0], "CH1", "Q").await.unwrap();
        assert_eq!(mock.writes().await, vec!["Q:CH1 8"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_lut_clears_every_table() {
        let (mock, driver) = mock_driver();

        driver.reset_lut(80e-9).await.unwrap();

        let writes = mock.writes().await;
        assert_eq!(writes.len(), 7);
        assert_eq!(writes[0], "DAC:STOPPOS 10.000000000000");
        for name in ["DAC:CH1", "DAC:CH2", "I:CH1", "Q:CH1", "I:CH2", "Q:CH2"] {
            assert_eq!(mock.table(name).await, Some(vec![0; 10]), "{}", name);
        }
    }

    #[test]
    fn test_setpoint_axes() {
        let (_mock, driver) = mock_driver();
        driver.nb_measure().set_cached(4);
        driver.length_time().set_cached(3);
        driver.pulse_zero().set_cached(0.0);

        assert_eq!(driver.pulse_axis(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(driver.time_axis(), vec![0.0, 1.0, 2.0]);
        assert_eq!(driver.channel_axis(), vec![0.0, 1.0]);
    }
}
