//! Capability traits implemented by Build HAT devices.
//!
//! Each trait is async, `Send + Sync`, and takes `&self`; implementors use
//! interior mutability for state.
//!
//! [`Motor`] covers the full motor capability set. Open-loop drivers only
//! implement the power methods; the motion-control methods have default
//! implementations that return [`HatError::Unsupported`], so callers get a
//! deterministic "not supported" error instead of a crash.

use crate::error::{HatError, HatResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Static properties of a motor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorProperties {
    /// Whether `position()` reports a real encoder position
    pub position_reporting: bool,
}

/// Capability: Motor
///
/// # Contract
/// - `set_power` takes a signed fraction in `[-1.0, 1.0]`
/// - `is_powered` reports the last commanded power, not a measured one
/// - `stop` is equivalent to `set_power(0.0)`
#[async_trait]
pub trait Motor: Send + Sync {
    /// Drive the motor open-loop at `power` (fraction of full power).
    async fn set_power(&self, power: f64) -> HatResult<()>;

    /// Whether the motor is powered, and the commanded power.
    async fn is_powered(&self) -> HatResult<(bool, f64)>;

    /// Stop the motor.
    async fn stop(&self) -> HatResult<()> {
        self.set_power(0.0).await
    }

    /// Whether the motor is moving.
    ///
    /// Without feedback this is the same as being powered.
    async fn is_moving(&self) -> HatResult<bool> {
        let (powered, _) = self.is_powered().await?;
        Ok(powered)
    }

    /// Static properties of this motor.
    fn properties(&self) -> MotorProperties {
        MotorProperties::default()
    }

    /// Spin for a number of revolutions at the given rpm.
    async fn go_for(&self, _rpm: f64, _revolutions: f64) -> HatResult<()> {
        Err(HatError::Unsupported("go_for"))
    }

    /// Move to an absolute position in revolutions.
    async fn go_to(&self, _rpm: f64, _position_revolutions: f64) -> HatResult<()> {
        Err(HatError::Unsupported("go_to"))
    }

    /// Redefine the current position as `offset`.
    async fn reset_zero_position(&self, _offset: f64) -> HatResult<()> {
        Err(HatError::Unsupported("reset_zero_position"))
    }

    /// Current position in revolutions.
    async fn position(&self) -> HatResult<f64> {
        Err(HatError::Unsupported("position"))
    }
}

/// Capability: Generic Command Execution
///
/// # Contract
/// - `execute_command()` takes a command name and JSON arguments
/// - Returns a JSON object with results
/// - Unknown commands return [`HatError::UnknownCommand`]
#[async_trait]
pub trait Commandable: Send + Sync {
    /// Run `command` with JSON `args`.
    async fn execute_command(
        &self,
        command: &str,
        args: serde_json::Value,
    ) -> HatResult<serde_json::Value>;
}
