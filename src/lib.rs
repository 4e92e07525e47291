//! Qubit readout lab control.
//!
//! Ties the instrument drivers together: the lab configuration
//! ([`config::LabConfig`]), the driver registry that builds devices from it
//! ([`registry::DriverRegistry`]) and tracing setup for the `qubit-daq`
//! command-line tool.
//!
//! | Driver type     | Device                                  |
//! |-----------------|-----------------------------------------|
//! | `rs_smb100a`    | Rohde & Schwarz SMB100A microwave source |
//! | `red_pitaya_iq` | Red Pitaya IQ acquisition/generation board |
//! | `mw_switch`     | Arduino microwave switch controller     |

pub mod config;
pub mod logging;
pub mod registry;

pub use config::{InstrumentDefinition, LabConfig};
pub use registry::DriverRegistry;

/// Register the factories of every driver crate.
pub fn register_default_factories(registry: &DriverRegistry) {
    daq_driver_rohde_schwarz::link();
    daq_driver_red_pitaya::link();
    daq_driver_mw_switch::link();

    registry.register_factory(Box::new(daq_driver_rohde_schwarz::Smb100aFactory));
    registry.register_factory(Box::new(daq_driver_red_pitaya::RedPitayaFactory));
    registry.register_factory(Box::new(daq_driver_mw_switch::MwSwitchFactory));
}
