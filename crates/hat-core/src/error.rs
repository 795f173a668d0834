//! Error types for the Build HAT driver.
//!
//! `HatError` is the single error type returned by connection, registry and
//! motor operations. Variants map onto the failure categories callers need to
//! tell apart:
//!
//! - **Construction failures** - `Open`, `Timeout`, `Bootloader`, `Firmware`
//!   abort building a connection; the transport is closed before they surface.
//! - **Transfer failures** - `ShortWrite` aborts a firmware upload.
//! - **Configuration failures** - `Configuration` is raised before any
//!   transport interaction (bad port designator, missing field).
//! - **Unsupported capabilities** - `Unsupported` is returned, never panicked,
//!   for motion-control operations the peripheral driver does not implement.
//! - **Runtime failures** - `Io`, `Closed`, `InvalidParameter`,
//!   `UnknownCommand` are returned per call with no deferred reporting.

use thiserror::Error;

/// Convenience alias for results using [`HatError`].
pub type HatResult<T> = std::result::Result<T, HatError>;

/// Coarse error category, for callers that branch on the kind of failure
/// rather than on the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Opening, reading or writing the serial link failed.
    Transport,
    /// A bounded wait ran out.
    Timeout,
    /// The peripheral misbehaved (bootloader, short write, firmware).
    Protocol,
    /// Configuration was rejected before any I/O.
    Configuration,
    /// The operation is not implemented by the driver.
    Unsupported,
    /// A caller-supplied value or command was rejected.
    InvalidParameter,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::InvalidParameter => "invalid_parameter",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for the Build HAT driver.
#[derive(Error, Debug)]
pub enum HatError {
    /// The serial transport could not be opened.
    #[error("failed to open serial port {path}: {source}")]
    Open {
        /// Device path that failed to open.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A bounded protocol wait ran out of attempts.
    ///
    /// The message names what was awaited, e.g. `no version string detected`
    /// or `did not get line [Done initialising ports]`.
    #[error("{0}")]
    Timeout(String),

    /// The peripheral still reported a bootloader banner after one firmware
    /// upload attempt.
    #[error("still got bootloader on second time: {version}")]
    Bootloader {
        /// Banner reported after the upload.
        version: String,
    },

    /// The transport accepted fewer bytes of a binary frame than required.
    #[error("only wrote {written} rather than {expected}")]
    ShortWrite {
        /// Bytes the transport accepted.
        written: usize,
        /// Frame payload length.
        expected: usize,
    },

    /// Firmware image or signature could not be loaded.
    #[error("firmware bundle unavailable: {0}")]
    Firmware(String),

    /// Configuration validation failed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The operation is part of the motor capability set but not implemented
    /// by this driver.
    #[error("{0} is not supported by the Build HAT motor driver")]
    Unsupported(&'static str),

    /// A caller-supplied value is outside its allowed range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The diagnostic command surface received a command it does not know.
    #[error("Build HAT connection can't handle command {0}")]
    UnknownCommand(String),

    /// The connection was closed; no further writes are possible.
    #[error("connection {0} is closed")]
    Closed(String),

    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HatError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HatError::Open { .. } | HatError::Io(_) | HatError::Closed(_) => ErrorKind::Transport,
            HatError::Timeout(_) => ErrorKind::Timeout,
            HatError::Bootloader { .. }
            | HatError::ShortWrite { .. }
            | HatError::Firmware(_)
            | HatError::UnknownCommand(_) => ErrorKind::Protocol,
            HatError::Configuration(_) => ErrorKind::Configuration,
            HatError::Unsupported(_) => ErrorKind::Unsupported,
            HatError::InvalidParameter(_) => ErrorKind::InvalidParameter,
        }
    }

    /// True for the "not supported" signal of unimplemented capabilities.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, HatError::Unsupported(_))
    }
}
