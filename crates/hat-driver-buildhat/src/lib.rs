//! Raspberry Pi Build HAT driver.
//!
//! Drives the Build HAT motor controller over its serial link:
//! - [`HatConnection`]: one shared link per device path, with a background
//!   read loop and the bootstrap/firmware-recovery sequence
//! - [`ConnectionRegistry`]: reuses one connection per path
//! - [`HatMotor`]: open-loop power control of one port
//!
//! # Usage
//!
//! ```rust,ignore
//! use hat_core::serial::{SerialSettings, TokioSerialOpener};
//! use hat_core::Motor;
//! use hat_driver_buildhat::{ConnectionOptions, ConnectionRegistry, HatMotor};
//! use std::sync::Arc;
//!
//! let registry = ConnectionRegistry::new(
//!     Arc::new(TokioSerialOpener::new(SerialSettings::default())),
//!     ConnectionOptions::default(),
//! );
//! let conn = registry.get("/dev/serial0").await?;
//! let motor = HatMotor::new("left", conn, 0)?;
//! motor.set_power(0.5).await?;
//! ```

pub mod checksum;
pub mod connection;
pub mod factory;
pub mod firmware;
pub mod motor;
pub mod protocol;
pub mod registry;

pub use checksum::checksum;
pub use connection::{BootstrapState, BootstrapTiming, ConnectionOptions, HatConnection};
pub use factory::{MotorConfig, MotorFactory};
pub use firmware::{FirmwareBundle, FirmwareSource};
pub use motor::{parse_port, HatMotor};
pub use registry::{ConnectionRegistry, DEFAULT_PATH};
