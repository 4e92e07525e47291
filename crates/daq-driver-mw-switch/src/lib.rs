//! Arduino Microwave Switch Driver
//!
//! Routes the room-temperature (`NC`/`NO`) and cryogenic (1/2) microwave
//! switches through an Arduino. Codes travel over a TCP serial bridge or,
//! with the `serial` feature, a local serial port.
//!
//! # Capabilities
//!
//! - `Parameterized` - last commanded position of each switch
//! - `Routable` - `route("rt", "NC")`, `route("cryo", "2")`
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_mw_switch::MwSwitchFactory;
//!
//! registry.register_factory(Box::new(MwSwitchFactory));
//!
//! let config = toml::toml! {
//!     host = "192.168.1.30"
//!     port = 8888
//! };
//! let components = factory.build(config.into()).await?;
//! ```

mod driver;
pub mod transport;

pub use driver::{
    CryoSwitchPosition, MwSwitchConfig, MwSwitchDriver, MwSwitchFactory, RtSwitchPosition,
    SwitchError,
};
#[cfg(feature = "serial")]
pub use transport::SerialPortWriter;
pub use transport::{MockSerial, SerialWrite, TcpSerialBridge};

/// Force linker to include this crate's factories.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<MwSwitchFactory>());
}
