//! Config-driven motor construction.
//!
//! # Usage
//!
//! ```rust,ignore
//! use hat_driver_buildhat::{ConnectionRegistry, MotorFactory};
//!
//! let config = toml::toml! {
//!     path = "/dev/serial0"
//!     port = "A"
//! };
//! MotorFactory.validate(&config.clone().into())?;
//! let motor = MotorFactory.build("left", config.into(), &registry).await?;
//! ```

use crate::motor::{parse_port, HatMotor};
use crate::registry::ConnectionRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for one Build HAT motor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorConfig {
    /// Serial device of the HAT; empty means the default path
    #[serde(default)]
    pub path: String,
    /// Port designator: `A`-`D`, `a`-`d` or `0`-`3`
    pub port: String,
}

impl MotorConfig {
    /// Port index, validated.
    pub fn port_number(&self) -> Result<u8> {
        parse_port(&self.port).with_context(|| format!("Invalid motor port '{}'", self.port))
    }
}

/// Factory for Build HAT motors.
pub struct MotorFactory;

impl MotorFactory {
    /// Driver identifier used in configuration.
    pub fn driver_type(&self) -> &'static str {
        "buildhat_motor"
    }

    /// Human-readable driver name.
    pub fn name(&self) -> &'static str {
        "Raspberry Pi Build HAT Motor"
    }

    /// Check `config` without touching any transport.
    pub fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MotorConfig = config
            .clone()
            .try_into()
            .context("Invalid Build HAT motor config")?;
        cfg.port_number()?;
        Ok(())
    }

    /// Build a motor, reusing or opening the shared connection for its path.
    pub async fn build(
        &self,
        name: &str,
        config: toml::Value,
        registry: &ConnectionRegistry,
    ) -> Result<HatMotor> {
        let cfg: MotorConfig = config
            .try_into()
            .context("Invalid Build HAT motor config")?;
        let port = cfg.port_number()?;

        let conn = registry
            .get(&cfg.path)
            .await
            .with_context(|| format!("Failed to connect to Build HAT for motor '{}'", name))?;

        tracing::info!(motor = name, port, path = %conn.path(), "Built Build HAT motor");
        Ok(HatMotor::new(name, conn, port)?)
    }
}
