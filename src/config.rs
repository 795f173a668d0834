//! Build HAT configuration using Figment
//!
//! Configuration is layered:
//! 1. Built-in defaults
//! 2. A TOML file (usually `config/buildhat.toml`)
//! 3. Environment variables prefixed with `BUILDHAT_`, nested keys split on
//!    `__` (e.g. `BUILDHAT_CONNECTION__PATH=/dev/ttyAMA0`)
//!
//! # Example
//! ```no_run
//! use buildhat::config::HatConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = HatConfig::load()?;
//! config.validate().map_err(anyhow::Error::msg)?;
//!
//! let registry = config.registry();
//! let motors = config.build_motors(&registry).await?;
//! # Ok(())
//! # }
//! ```

use crate::logging::LoggingConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use hat_core::serial::SerialSettings;
use hat_driver_buildhat::connection::metadata::DEFAULT_LINE_HISTORY;
use hat_driver_buildhat::firmware::DEFAULT_FIRMWARE_DIR;
use hat_driver_buildhat::{
    parse_port, BootstrapTiming, ConnectionOptions, ConnectionRegistry, FirmwareSource, HatMotor,
    MotorConfig, MotorFactory, DEFAULT_PATH,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub const DEFAULT_CONFIG_FILE: &str = "config/buildhat.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "BUILDHAT_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HatConfig {
    /// Serial link and bootstrap settings
    pub connection: ConnectionConfig,
    /// Motors to build at startup
    pub motors: Vec<MotorDefinition>,
    /// Log output
    pub logging: LoggingConfig,
}

/// Serial link settings shared by every connection the registry opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Device path used by motors that do not name one
    pub path: String,
    /// Baud rate and flow control for every opened port
    pub serial: SerialSettings,
    /// Directory holding `firmware.bin` and `signature.bin`
    pub firmware_dir: PathBuf,
    /// Number of unclassified lines kept for diagnostics
    pub line_history: usize,
    /// Bootstrap delays and poll budgets
    pub timing: BootstrapTiming,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            serial: SerialSettings::default(),
            firmware_dir: PathBuf::from(DEFAULT_FIRMWARE_DIR),
            line_history: DEFAULT_LINE_HISTORY,
            timing: BootstrapTiming::default(),
        }
    }
}

/// One configured motor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorDefinition {
    /// Unique motor name
    pub name: String,
    /// Device path and port letter
    #[serde(flatten)]
    pub config: MotorConfig,
}

impl HatConfig {
    /// Load from [`DEFAULT_CONFIG_FILE`] and the environment
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file path and the environment
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(HatConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading
    ///
    /// Nothing here touches a serial port.
    pub fn validate(&self) -> Result<(), String> {
        crate::logging::parse_log_level(&self.logging.level)?;

        if self.connection.path.trim().is_empty() {
            return Err("connection.path must not be empty".to_string());
        }

        if self.connection.line_history == 0 {
            return Err("connection.line_history must be at least 1".to_string());
        }

        let mut names = HashSet::new();
        for motor in &self.motors {
            if motor.name.trim().is_empty() {
                return Err("Motor name must not be empty".to_string());
            }
            if !names.insert(motor.name.as_str()) {
                return Err(format!("Duplicate motor name: {}", motor.name));
            }
            parse_port(&motor.config.port)
                .map_err(|e| format!("Motor '{}': {}", motor.name, e))?;
        }

        Ok(())
    }

    /// Options applied to every connection
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            line_history: self.connection.line_history,
            timing: self.connection.timing.clone(),
            firmware: FirmwareSource::Directory(self.connection.firmware_dir.clone()),
        }
    }

    /// Registry opening real serial ports with the configured settings
    #[cfg(feature = "serial")]
    pub fn registry(&self) -> ConnectionRegistry {
        use hat_core::serial::TokioSerialOpener;
        use std::sync::Arc;

        ConnectionRegistry::new(
            Arc::new(TokioSerialOpener::new(self.connection.serial.clone())),
            self.connection_options(),
        )
    }

    /// Build every configured motor through `registry`
    ///
    /// Motors without a path use `connection.path`. Motors on the same path
    /// share one connection.
    pub async fn build_motors(&self, registry: &ConnectionRegistry) -> Result<Vec<HatMotor>> {
        let mut motors = Vec::with_capacity(self.motors.len());
        for definition in &self.motors {
            let mut config = definition.config.clone();
            if config.path.is_empty() {
                config.path = self.connection.path.clone();
            }
            let value = toml::Value::try_from(&config).with_context(|| {
                format!("Failed to encode config for motor '{}'", definition.name)
            })?;
            motors.push(MotorFactory.build(&definition.name, value, registry).await?);
        }
        tracing::info!(count = motors.len(), "Built configured Build HAT motors");
        Ok(motors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hat_core::error::HatResult;
    use hat_core::serial::{DynSerial, SerialOpener};
    use serial_test::serial;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = HatConfig::load_from(dir.path().join("missing.toml")).unwrap();

        assert_eq!(config, HatConfig::default());
        assert_eq!(config.connection.path, "/dev/serial0");
        assert_eq!(config.connection.serial.baud_rate, 115_200);
        assert!(config.connection.serial.flow_control);
        assert_eq!(config.connection.line_history, 5);
        assert!(config.motors.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_toml() {
        let file = write_config(
            r#"
            [connection]
            path = "/dev/ttyAMA0"
            firmware_dir = "/opt/buildhat"
            line_history = 8

            [connection.timing]
            version_poll_interval = "50ms"
            reboot_settle = "5s"

            [logging]
            level = "debug"
            format = "json"

            [[motors]]
            name = "left"
            port = "A"

            [[motors]]
            name = "right"
            path = "/dev/ttyAMA1"
            port = "1"
            "#,
        );

        let config = HatConfig::load_from(file.path()).unwrap();
        assert_eq!(config.connection.path, "/dev/ttyAMA0");
        assert_eq!(config.connection.firmware_dir, PathBuf::from("/opt/buildhat"));
        assert_eq!(config.connection.line_history, 8);
        assert_eq!(
            config.connection.timing.version_poll_interval,
            Duration::from_millis(50)
        );
        assert_eq!(config.connection.timing.reboot_settle, Duration::from_secs(5));
        // Unset timing fields keep their defaults.
        assert_eq!(config.connection.timing.version_poll_attempts, 30);
        assert_eq!(config.logging.level, "debug");

        assert_eq!(config.motors.len(), 2);
        assert_eq!(config.motors[0].config.path, "");
        assert_eq!(config.motors[1].config.path, "/dev/ttyAMA1");
        assert!(config.validate().is_ok());

        let options = config.connection_options();
        assert_eq!(options.line_history, 8);
        assert!(matches!(
            options.firmware,
            FirmwareSource::Directory(ref dir) if dir == Path::new("/opt/buildhat")
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config(
            r#"
            [connection]
            path = "/dev/ttyAMA0"
            "#,
        );

        std::env::set_var("BUILDHAT_CONNECTION__PATH", "/dev/ttyS5");
        std::env::set_var("BUILDHAT_LOGGING__LEVEL", "warn");
        let result = HatConfig::load_from(file.path());
        std::env::remove_var("BUILDHAT_CONNECTION__PATH");
        std::env::remove_var("BUILDHAT_LOGGING__LEVEL");

        let config = result.unwrap();
        assert_eq!(config.connection.path, "/dev/ttyS5");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_validation_rejects_bad_motors() {
        let motor = |name: &str, port: &str| MotorDefinition {
            name: name.to_string(),
            config: MotorConfig {
                path: String::new(),
                port: port.to_string(),
            },
        };

        let mut config = HatConfig::default();
        config.motors = vec![motor("left", "E")];
        let err = config.validate().unwrap_err();
        assert!(err.contains("invalid port [E]"), "{}", err);

        config.motors = vec![motor("left", "AB")];
        let err = config.validate().unwrap_err();
        assert!(err.contains("exactly 1 character"), "{}", err);

        config.motors = vec![motor("", "A")];
        assert!(config.validate().is_err());

        config.motors = vec![motor("left", "A"), motor("left", "B")];
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate motor name"), "{}", err);

        config.motors = vec![motor("left", "a"), motor("right", "3")];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_connection() {
        let mut config = HatConfig::default();
        config.connection.line_history = 0;
        assert!(config.validate().is_err());

        let mut config = HatConfig::default();
        config.connection.path = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = HatConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    /// Opener whose peripheral answers `version` with a firmware banner.
    #[derive(Default)]
    struct BannerOpener {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl SerialOpener for BannerOpener {
        async fn open(&self, _path: &str) -> HatResult<DynSerial> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (mut host, device) = tokio::io::duplex(4096);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                let mut buf = [0u8; 256];
                loop {
                    match host.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                    if let Some(pos) = seen.windows(8).position(|w| w == b"version\r") {
                        seen.drain(..pos + 8);
                        let _ = host.write_all(b"Firmware version: 1.0 test\r").await;
                    }
                }
            });
            Ok(Box::new(device))
        }
    }

    #[tokio::test]
    async fn test_build_motors_shares_connections() {
        let mut config = HatConfig::default();
        config.connection.path = "/dev/ttyHAT".to_string();
        config.connection.timing = BootstrapTiming {
            startup_settle: Duration::from_millis(1),
            version_query_delay: Duration::from_millis(1),
            version_poll_interval: Duration::from_millis(10),
            ..BootstrapTiming::default()
        };
        config.motors = vec![
            MotorDefinition {
                name: "left".to_string(),
                config: MotorConfig {
                    path: String::new(),
                    port: "A".to_string(),
                },
            },
            MotorDefinition {
                name: "right".to_string(),
                config: MotorConfig {
                    path: "/dev/ttyHAT".to_string(),
                    port: "d".to_string(),
                },
            },
        ];
        assert!(config.validate().is_ok());

        let opener = Arc::new(BannerOpener::default());
        let registry = ConnectionRegistry::new(opener.clone(), config.connection_options());
        let motors = config.build_motors(&registry).await.unwrap();

        assert_eq!(motors.len(), 2);
        assert_eq!(motors[0].port(), 0);
        assert_eq!(motors[1].port(), 3);
        assert_eq!(motors[0].connection().path(), "/dev/ttyHAT");
        assert!(Arc::ptr_eq(motors[0].connection(), motors[1].connection()));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        registry.shutdown().await;
    }
}
