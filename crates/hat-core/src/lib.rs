//! Core types and traits shared by the Build HAT driver crates.
//!
//! - [`error`]: the [`HatError`] taxonomy every driver operation reports through
//! - [`serial`]: transport abstractions (`SerialPortIO`, `DynSerial`, `SerialOpener`)
//! - [`capabilities`]: the `Motor` and `Commandable` capability traits

pub mod capabilities;
pub mod error;
pub mod serial;

pub use capabilities::{Commandable, Motor, MotorProperties};
pub use error::{ErrorKind, HatError, HatResult};
pub use serial::{DynSerial, SerialOpener, SerialPortIO, SerialSettings};
