//! Open-loop motor on one Build HAT port.
//!
//! A [`HatMotor`] only formats commands and hands them to the shared
//! [`HatConnection`]. It never opens or closes the transport; several motors
//! on the same HAT share one connection.

use crate::connection::HatConnection;
use crate::protocol::{set_power_command, NUM_PORTS};
use async_trait::async_trait;
use hat_core::capabilities::{Commandable, Motor, MotorProperties};
use hat_core::error::{HatError, HatResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Parse a one-character port designator.
///
/// Accepts `A`-`D`, `a`-`d` or `0`-`3` and returns the port index 0-3.
pub fn parse_port(designator: &str) -> HatResult<u8> {
    let mut chars = designator.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return Err(HatError::Configuration(
            "port has to be exactly 1 character long".to_string(),
        ));
    };

    let port = match c {
        'A'..='D' => c as u8 - b'A',
        'a'..='d' => c as u8 - b'a',
        '0'..='3' => c as u8 - b'0',
        _ => {
            return Err(HatError::Configuration(format!(
                "invalid port [{}]",
                designator
            )))
        }
    };
    Ok(port)
}

/// Motor on one port of a shared connection.
pub struct HatMotor {
    name: String,
    conn: Arc<HatConnection>,
    port: u8,
    /// Last commanded power, stored as `f64` bits
    power: AtomicU64,
}

impl HatMotor {
    /// Motor on port index `port` (0-3) of `conn`.
    pub fn new(name: impl Into<String>, conn: Arc<HatConnection>, port: u8) -> HatResult<Self> {
        if port >= NUM_PORTS {
            return Err(HatError::Configuration(format!(
                "port index {} out of range 0-{}",
                port,
                NUM_PORTS - 1
            )));
        }
        Ok(Self {
            name: name.into(),
            conn,
            port,
            power: AtomicU64::new(0f64.to_bits()),
        })
    }

    /// Motor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port index.
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Shared connection.
    pub fn connection(&self) -> &Arc<HatConnection> {
        &self.conn
    }

    fn commanded_power(&self) -> f64 {
        f64::from_bits(self.power.load(Ordering::Acquire))
    }

    /// Stop the motor. The shared connection stays open.
    pub async fn close(&self) -> HatResult<()> {
        self.stop().await
    }
}

#[async_trait]
impl Motor for HatMotor {
    async fn set_power(&self, power: f64) -> HatResult<()> {
        if !power.is_finite() || !(-1.0..=1.0).contains(&power) {
            return Err(HatError::InvalidParameter(format!(
                "power {} outside [-1.0, 1.0]",
                power
            )));
        }

        tracing::debug!(motor = %self.name, port = self.port, power, "Set motor power");
        self.power.store(power.to_bits(), Ordering::Release);
        self.conn
            .write(set_power_command(self.port, power).as_bytes())
            .await
    }

    async fn is_powered(&self) -> HatResult<(bool, f64)> {
        let power = self.commanded_power();
        Ok((power != 0.0, power))
    }

    fn properties(&self) -> MotorProperties {
        MotorProperties {
            position_reporting: false,
        }
    }
}

#[async_trait]
impl Commandable for HatMotor {
    async fn execute_command(
        &self,
        command: &str,
        _args: serde_json::Value,
    ) -> HatResult<serde_json::Value> {
        Err(HatError::UnknownCommand(command.to_string()))
    }
}

impl std::fmt::Debug for HatMotor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HatMotor")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("power", &self.commanded_power())
            .finish()
    }
}
