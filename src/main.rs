//! CLI Entry Point for qubit-daq
//!
//! Drives the lab instruments described in the lab configuration:
//! - route the room-temperature and cryogenic microwave switches
//! - read and write microwave source parameters
//! - synthesize and upload Red Pitaya LUTs
//! - run a Red Pitaya acquisition
//!
//! # Usage
//!
//! ```bash
//! qubit-daq --config config/lab.toml list
//! qubit-daq switch rt NC
//! qubit-daq source set frequency 6.2e9
//! qubit-daq lut STEP 1 80e-9 16e-9 8e-9 --channel CH1 --trigger CH1
//! qubit-daq --mock acquire --nb-measure 10 --max-faults 3
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use daq_core::driver::Capability;
use daq_driver_red_pitaya::{fill_lut, lut, Channel, Trigger};
use qubit_daq::config::{self, LabConfig};
use qubit_daq::{logging, DriverRegistry};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "qubit-daq")]
#[command(about = "Qubit readout lab control", long_about = None)]
struct Cli {
    /// Lab configuration file (TOML format)
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Replace every instrument with its simulated device
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List driver types and configured devices
    List,

    /// Route a microwave switch
    Switch {
        /// Which switch to route
        #[arg(value_enum)]
        switch: SwitchName,
        /// NC/NO for the room-temperature switch, 1/2 for the cryogenic one
        position: String,
        /// Switch controller ID (needed when several are configured)
        #[arg(long)]
        device: Option<String>,
    },

    /// Read or write a microwave source parameter
    #[command(subcommand)]
    Source(SourceCommands),

    /// Synthesize a LUT and upload it to a DAC channel
    Lut {
        /// Waveform kind (SIN, COS, RAMSEY, ECHO or STEP)
        kind: String,
        /// Waveform parameters (amplitudes and durations in seconds)
        #[arg(allow_negative_numbers = true)]
        params: Vec<f64>,
        /// DAC channel (CH1 or CH2)
        #[arg(long, default_value = "CH1")]
        channel: String,
        /// Trigger tag (NONE, CH1, CH2 or BOTH)
        #[arg(long, default_value = "NONE")]
        trigger: String,
        /// Print the packed codes instead of uploading them
        #[arg(long)]
        dry_run: bool,
        /// Board ID (needed when several are configured)
        #[arg(long)]
        device: Option<String>,
    },

    /// Run one acquisition and print a per-channel summary
    Acquire {
        /// Frames to collect
        #[arg(long)]
        nb_measure: Option<usize>,
        /// Buffer faults tolerated before giving up
        #[arg(long)]
        max_faults: Option<u32>,
        /// Board ID (needed when several are configured)
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Set a parameter, e.g. `source set power -20`
    Set {
        param: String,
        #[arg(allow_negative_numbers = true)]
        value: String,
        #[arg(long)]
        device: Option<String>,
    },

    /// Read a parameter back from the instrument
    Get {
        param: String,
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SwitchName {
    /// Room-temperature switch
    Rt,
    /// Cryogenic switch
    Cryo,
}

impl SwitchName {
    fn as_str(self) -> &'static str {
        match self {
            SwitchName::Rt => "rt",
            SwitchName::Cryo => "cryo",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut lab = LabConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    lab.validate().map_err(anyhow::Error::msg)?;
    if cli.mock {
        lab.force_mock();
    }

    logging::init_from_config(&lab);
    tracing::debug!(config = %cli.config.display(), "Loaded lab configuration");

    match cli.command {
        Commands::List => list(lab).await,
        Commands::Switch {
            switch,
            position,
            device,
        } => route_switch(lab, switch, &position, device.as_deref()).await,
        Commands::Source(cmd) => source(lab, cmd).await,
        Commands::Lut {
            kind,
            params,
            channel,
            trigger,
            dry_run,
            device,
        } => {
            if dry_run {
                print_lut(&kind, &params, &channel, &trigger)
            } else {
                upload_lut(lab, &kind, &params, &channel, &trigger, device.as_deref()).await
            }
        }
        Commands::Acquire {
            nb_measure,
            max_faults,
            device,
        } => acquire(lab, nb_measure, max_faults, device.as_deref()).await,
    }
}

/// Build the enabled instruments whose driver provides `wanted`.
async fn open_lab(mut lab: LabConfig, wanted: Option<Capability>) -> Result<DriverRegistry> {
    let registry = DriverRegistry::new();
    qubit_daq::register_default_factories(&registry);

    if let Some(wanted) = wanted {
        lab.instruments.retain(|inst| {
            registry
                .factory_info(&inst.r#type)
                .map(|info| info.capabilities.contains(&wanted))
                .unwrap_or(true)
        });
    }

    let count = registry.register_from_config(&lab).await?;
    tracing::info!("{} device(s) ready", count);
    Ok(registry)
}

async fn list(lab: LabConfig) -> Result<()> {
    let registry = open_lab(lab, None).await?;

    println!("Driver types:");
    for driver_type in registry.list_factories() {
        if let Some(info) = registry.factory_info(&driver_type) {
            let caps: Vec<_> = info.capabilities.iter().map(|c| c.name()).collect();
            println!("  {:<14} {} [{}]", info.driver_type, info.name, caps.join(", "));
        }
    }

    println!("Devices:");
    for device in registry.devices() {
        let meta = &device.components.metadata;
        println!(
            "  {:<10} {:<14} {:<12} {}{}",
            device.id,
            device.driver_type,
            device.category().label(),
            meta.endpoint.as_deref().unwrap_or("-"),
            if meta.mock { " (mock)" } else { "" }
        );
        if let Some(identity) = &meta.identity {
            println!("      {}", identity.trim());
        }
        if let Some(params) = &device.components.parameterized {
            for param in params.parameters().iter() {
                let unit = param.metadata().unit.as_deref().unwrap_or("");
                println!("      {} = {} {}", param.name(), param.value_string(), unit);
            }
        }
    }
    Ok(())
}

async fn route_switch(
    lab: LabConfig,
    switch: SwitchName,
    position: &str,
    device: Option<&str>,
) -> Result<()> {
    let registry = open_lab(lab, Some(Capability::Routable)).await?;
    registry
        .routable(device)?
        .route(switch.as_str(), position)
        .await?;
    Ok(())
}

async fn source(lab: LabConfig, cmd: SourceCommands) -> Result<()> {
    let registry = open_lab(lab, Some(Capability::Parameterized)).await?;

    match cmd {
        SourceCommands::Set {
            param,
            value,
            device,
        } => {
            let source = registry.signal_source(device.as_deref())?;
            let parameter = source
                .parameters()
                .get(&param)
                .with_context(|| format!("unknown source parameter '{}'", param))?;
            parameter.set_from_str(&value).await?;
            println!("{} = {}", parameter.name(), parameter.value_string());
        }
        SourceCommands::Get { param, device } => {
            let source = registry.signal_source(device.as_deref())?;
            let parameter = source
                .parameters()
                .get(&param)
                .with_context(|| format!("unknown source parameter '{}'", param))?;
            let value = parameter.refresh().await?;
            println!("{} = {}", parameter.name(), value);
        }
    }
    Ok(())
}

fn print_lut(kind: &str, params: &[f64], channel: &str, trigger: &str) -> Result<()> {
    let channel: Channel = channel.parse()?;
    let trigger: Trigger = trigger.parse()?;
    let table = fill_lut(kind, params)?;
    let codes = lut::pack_dac_codes(&table, trigger);

    println!("{:?}: {} samples", channel, codes.len());
    println!("{}", lut::format_codes(&codes));
    Ok(())
}

async fn upload_lut(
    lab: LabConfig,
    kind: &str,
    params: &[f64],
    channel: &str,
    trigger: &str,
    device: Option<&str>,
) -> Result<()> {
    let registry = open_lab(lab, Some(Capability::WaveformGenerator)).await?;
    let written = registry
        .waveform_generator(device)?
        .load_waveform(kind, params, channel, trigger)
        .await?;
    println!("{} samples written to {}", written, channel);
    Ok(())
}

async fn acquire(
    mut lab: LabConfig,
    nb_measure: Option<usize>,
    max_faults: Option<u32>,
    device: Option<&str>,
) -> Result<()> {
    for inst in lab
        .instruments
        .iter_mut()
        .filter(|inst| device.map_or(true, |id| inst.id == id))
    {
        if let Some(n) = nb_measure {
            let n = i64::try_from(n).context("--nb-measure is too large")?;
            inst.set_option("nb_measure", toml::Value::Integer(n));
        }
        if let Some(faults) = max_faults {
            inst.set_nested_option(
                "retry",
                "max_buffer_faults",
                toml::Value::Integer(i64::from(faults)),
            );
        }
    }

    let registry = open_lab(lab, Some(Capability::TraceProducer)).await?;
    let producer = registry.trace_producer(device)?;

    let labels = producer.channel_labels().await?;
    let traces = producer.read_traces().await?;
    for (label, trace) in labels.iter().zip(&traces) {
        let mean = if trace.is_empty() {
            f64::NAN
        } else {
            trace.iter().sum::<f64>() / trace.len() as f64
        };
        println!("{:<4} {:>8} samples  mean {:+.6}", label, trace.len(), mean);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use daq_driver_red_pitaya::{LutError, Waveform};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn lut_help_lists_only_supported_kinds() {
        let cli = Cli::command();
        let lut = cli.find_subcommand("lut").unwrap();
        let kind = lut.get_arguments().find(|a| a.get_id() == "kind").unwrap();
        let help = kind.get_help().unwrap().to_string();

        let listed: Vec<&str> = help
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| word.len() > 1 && word.chars().all(|c| c.is_ascii_uppercase()))
            .collect();
        assert_eq!(listed, ["SIN", "COS", "RAMSEY", "ECHO", "STEP"]);

        for name in listed {
            let err = Waveform::from_kind(name, &[]).unwrap_err();
            assert!(
                matches!(err, LutError::InvalidParameters { .. }),
                "{name} is not a waveform kind"
            );
        }
    }
}
