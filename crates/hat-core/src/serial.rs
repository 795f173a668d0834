//! Serial transport abstractions.
//!
//! The driver never talks to a UART directly. It receives a [`DynSerial`]
//! from a [`SerialOpener`], which lets tests substitute an in-memory port for
//! `tokio_serial::SerialStream`.
//!
//! # Example
//!
//! ```rust,ignore
//! use hat_core::serial::{SerialOpener, SerialSettings, TokioSerialOpener};
//!
//! let opener = TokioSerialOpener::new(SerialSettings::default());
//! let port = opener.open("/dev/serial0").await?;
//! ```

use crate::error::HatResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

/// Default Build HAT line rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Trait alias for async serial port I/O.
///
/// Anything implementing `AsyncRead + AsyncWrite + Unpin + Send` can carry
/// the protocol:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
/// - channel-backed mocks
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Line settings applied when opening a port.
///
/// Data bits, parity and stop bits are fixed at 8N1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate (the Build HAT runs at 115200)
    pub baud_rate: u32,
    /// RTS/CTS hardware flow control
    pub flow_control: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            flow_control: true,
        }
    }
}

/// Opens the byte transport behind a device path.
#[async_trait]
pub trait SerialOpener: Send + Sync {
    /// Open `path` and return an exclusive handle to it.
    ///
    /// Dropping the returned handle closes the transport.
    async fn open(&self, path: &str) -> HatResult<DynSerial>;
}

/// [`SerialOpener`] backed by `tokio-serial`.
#[cfg(feature = "serial")]
#[derive(Debug, Clone, Default)]
pub struct TokioSerialOpener {
    settings: SerialSettings,
}

#[cfg(feature = "serial")]
impl TokioSerialOpener {
    /// Opener applying `settings` to every port.
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }

    /// Settings applied on open.
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl SerialOpener for TokioSerialOpener {
    async fn open(&self, path: &str) -> HatResult<DynSerial> {
        let port = open_serial_async(path, &self.settings).await?;
        Ok(Box::new(port))
    }
}

/// Open a serial port on a blocking thread.
///
/// Opening a tty can block on some platforms, so the open runs inside
/// `spawn_blocking`. Settings are 8N1 with the configured baud rate and flow
/// control.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    path: &str,
    settings: &SerialSettings,
) -> HatResult<tokio_serial::SerialStream> {
    use crate::error::HatError;
    use tokio_serial::SerialPortBuilderExt;

    let path_owned = path.to_string();
    let settings = settings.clone();

    let opened = tokio::task::spawn_blocking(move || {
        let flow_control = if settings.flow_control {
            tokio_serial::FlowControl::Hardware
        } else {
            tokio_serial::FlowControl::None
        };
        tokio_serial::new(&path_owned, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(flow_control)
            .open_native_async()
    })
    .await
    .map_err(|e| HatError::Open {
        path: path.to_string(),
        source: std::io::Error::other(e),
    })?;

    let port = opened.map_err(|e| HatError::Open {
        path: path.to_string(),
        source: e.into(),
    })?;

    tracing::info!(port = path, baud = settings.baud_rate, "Opened Build HAT serial port");
    Ok(port)
}
