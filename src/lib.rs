//! # Build HAT
//!
//! Host-side driver for the Raspberry Pi Build HAT motor controller. The HAT
//! sits on a UART and speaks a `\r`-terminated ASCII protocol; when it boots
//! into its bootloader the driver pushes a firmware image before use.
//!
//! ## Crate Structure
//!
//! - **`hat-core`**: error taxonomy (`HatError`), serial transport
//!   abstractions and the `Motor`/`Commandable` capability traits.
//! - **`hat-driver-buildhat`**: the serial connection (read loop, write path,
//!   bootstrap and firmware recovery), the connection registry, and the motor
//!   port driver.
//! - **`config`**: layered configuration (`HatConfig`) loaded with Figment.
//! - **`logging`**: `tracing-subscriber` initialisation.
//!
//! ## Example
//! ```no_run
//! use buildhat::{config::HatConfig, logging, Motor};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = HatConfig::load()?;
//! config.validate().map_err(anyhow::Error::msg)?;
//! logging::init(&config.logging).map_err(anyhow::Error::msg)?;
//!
//! let registry = config.registry();
//! for motor in config.build_motors(&registry).await? {
//!     motor.set_power(0.25).await?;
//! }
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;

pub use hat_core::{Commandable, ErrorKind, HatError, HatResult, Motor, MotorProperties};
pub use hat_driver_buildhat::{
    checksum, parse_port, BootstrapState, BootstrapTiming, ConnectionOptions, ConnectionRegistry,
    FirmwareBundle, FirmwareSource, HatConnection, HatMotor, MotorConfig, MotorFactory,
    DEFAULT_PATH,
};
