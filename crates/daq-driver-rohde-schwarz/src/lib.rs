//! Rohde & Schwarz SMB100A Microwave Source Driver
//!
//! Drives an SMB100A signal generator over raw SCPI on TCP (port 5025,
//! `\n` terminated).
//!
//! # Capabilities
//!
//! - `Parameterized` - frequency, power, phase, RF output and sweep settings
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_rohde_schwarz::Smb100aFactory;
//!
//! registry.register_factory(Box::new(Smb100aFactory));
//!
//! let config = toml::toml! {
//!     host = "192.168.1.20"
//!     port = 5025
//! };
//! let components = factory.build(config.into()).await?;
//! ```

mod driver;
mod mock;

pub use driver::{
    deg_to_rad, rad_to_deg, OutputState, Smb100aConfig, Smb100aDriver, Smb100aFactory,
    DEFAULT_PORT,
};
pub use mock::MockSmb100a;

/// Force linker to include this crate's factories.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Smb100aFactory>());
}
