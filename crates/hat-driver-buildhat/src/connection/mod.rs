//! Serial connection to one Build HAT.
//!
//! A [`HatConnection`] owns the transport for one device path. The transport
//! is split in two:
//!
//! - the read half belongs to a background task that assembles `\r`-terminated
//!   lines, classifies them and folds them into [`ProtocolMetadata`];
//! - the write half sits behind an async mutex so concurrent writers never
//!   interleave bytes on the wire.
//!
//! The metadata mutex and the write mutex are independent: reading the
//! version or recent lines never waits on a write in progress, and a write
//! never waits on the read loop.
//!
//! Replies are not paired with requests. Callers that need an answer poll the
//! metadata for it (see the bootstrap waits).

mod bootstrap;
pub mod metadata;

use crate::firmware::FirmwareSource;
use crate::protocol::{
    deselect_all_command, power_off_all_command, raw_command, FRAME_END, FRAME_START,
    LINE_TERMINATOR, MAX_LINE_LEN,
};
use async_trait::async_trait;
use hat_core::capabilities::Commandable;
use hat_core::error::{HatError, HatResult};
use hat_core::serial::DynSerial;
use metadata::{LineOutcome, ProtocolMetadata, DEFAULT_LINE_HISTORY};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

/// Delays and polling bounds used while bringing a connection up.
///
/// The settle delays are what the bootloader needs in practice; it does not
/// acknowledge the individual upload steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapTiming {
    /// Pause after the read loop starts, before the first command
    #[serde(with = "humantime_serde")]
    pub startup_settle: Duration,
    /// Pause after sending `version` before polling starts
    #[serde(with = "humantime_serde")]
    pub version_query_delay: Duration,
    /// Interval between checks for a version banner
    #[serde(with = "humantime_serde")]
    pub version_poll_interval: Duration,
    /// Checks before giving up on a version banner
    pub version_poll_attempts: u32,
    /// Pause between firmware upload steps
    #[serde(with = "humantime_serde")]
    pub upload_settle: Duration,
    /// Interval between checks for the reboot confirmation line
    #[serde(with = "humantime_serde")]
    pub confirm_poll_interval: Duration,
    /// Checks before giving up on the reboot confirmation line
    pub confirm_poll_attempts: u32,
    /// Pause after the rebooted firmware reports its ports ready
    #[serde(with = "humantime_serde")]
    pub reboot_settle: Duration,
}

impl Default for BootstrapTiming {
    fn default() -> Self {
        Self {
            startup_settle: Duration::from_millis(100),
            version_query_delay: Duration::from_millis(20),
            version_poll_interval: Duration::from_millis(100),
            version_poll_attempts: 30,
            upload_settle: Duration::from_millis(100),
            confirm_poll_interval: Duration::from_millis(100),
            confirm_poll_attempts: 100,
            reboot_settle: Duration::from_secs(10),
        }
    }
}

/// Per-connection options.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Number of unclassified lines remembered
    pub line_history: usize,
    /// Bootstrap delays and poll budgets
    pub timing: BootstrapTiming,
    /// Firmware pushed when the HAT is in its bootloader
    pub firmware: FirmwareSource,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            line_history: DEFAULT_LINE_HISTORY,
            timing: BootstrapTiming::default(),
            firmware: FirmwareSource::default(),
        }
    }
}

/// Bring-up phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// `version` sent, waiting for a banner
    AwaitVersion,
    /// Bootloader banner seen, pushing firmware
    BootloaderRecovery,
    /// Normal firmware banner seen
    Normal,
    /// Bootstrap finished, the connection is usable
    Ready,
    /// Bootstrap gave up, the transport is closed
    Failed,
}

/// State shared between the connection handle and its read loop.
struct SharedState {
    name: String,
    metadata: Mutex<ProtocolMetadata>,
    bootstrap: Mutex<BootstrapState>,
    closed: AtomicBool,
    healthy: AtomicBool,
}

impl SharedState {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_bootstrap(&self, state: BootstrapState) {
        *self.bootstrap.lock() = state;
    }

    fn handle_line(&self, line: &str) {
        let outcome = self.metadata.lock().apply_line(line);
        match outcome {
            LineOutcome::Ignored | LineOutcome::PortUnchanged { .. } => {}
            LineOutcome::Version(version) => {
                tracing::info!(connection = %self.name, version = %version, "Firmware version at startup");
            }
            LineOutcome::PortChanged { port, status } => {
                tracing::info!(connection = %self.name, port, status = %status, "Port status change");
            }
            LineOutcome::Malformed(line) => {
                tracing::info!(connection = %self.name, line = %line, "Confusing port status line");
            }
            LineOutcome::Recorded(line) => {
                tracing::info!(connection = %self.name, line = %line, "Got unknown line");
            }
        }
    }

    fn mark_terminated(&self, reason: String) {
        tracing::error!(connection = %self.name, reason = %reason, "Build HAT read loop terminated");
        self.healthy.store(false, Ordering::Release);
        self.metadata.lock().set_last_error(reason);
    }
}

/// Connection to one Build HAT.
pub struct HatConnection {
    path: String,
    state: Arc<SharedState>,
    writer: tokio::sync::Mutex<Option<WriteHalf<DynSerial>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    timing: BootstrapTiming,
    firmware: FirmwareSource,
}

impl HatConnection {
    /// Start the read loop on `port` and run the bootstrap sequence.
    ///
    /// Blocks until the HAT reports normal firmware. When it boots into the
    /// bootloader this includes a full firmware upload and reboot, which
    /// takes on the order of 20 seconds with default timing.
    ///
    /// On failure the connection is closed, dropping the transport, before
    /// the error is returned.
    pub async fn connect(
        name: impl Into<String>,
        path: impl Into<String>,
        port: DynSerial,
        options: ConnectionOptions,
    ) -> HatResult<Self> {
        let conn = Self::start(name.into(), path.into(), port, options);
        tokio::time::sleep(conn.timing.startup_settle).await;

        if let Err(e) = conn.bootstrap().await {
            conn.state.set_bootstrap(BootstrapState::Failed);
            tracing::warn!(connection = %conn.name(), port = %conn.path, error = %e, "Build HAT bootstrap failed");
            if let Err(close_err) = conn.close().await {
                tracing::debug!(connection = %conn.name(), error = %close_err, "Close after failed bootstrap reported an error");
            }
            return Err(e);
        }

        tracing::info!(connection = %conn.name(), port = %conn.path, version = %conn.version(), "Build HAT ready");
        Ok(conn)
    }

    fn start(name: String, path: String, port: DynSerial, options: ConnectionOptions) -> Self {
        let (read_half, write_half) = tokio::io::split(port);
        let state = Arc::new(SharedState {
            name,
            metadata: Mutex::new(ProtocolMetadata::new(options.line_history)),
            bootstrap: Mutex::new(BootstrapState::AwaitVersion),
            closed: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
        });

        let reader = tokio::spawn(read_loop(read_half, state.clone()));

        Self {
            path,
            state,
            writer: tokio::sync::Mutex::new(Some(write_half)),
            reader: Mutex::new(Some(reader)),
            timing: options.timing,
            firmware: options.firmware,
        }
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Device path this connection was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last version banner seen, empty if none yet.
    pub fn version(&self) -> String {
        self.state.metadata.lock().version().to_string()
    }

    /// Most recent unclassified lines, oldest first.
    pub fn last_lines(&self) -> Vec<String> {
        self.state
            .metadata
            .lock()
            .last_lines()
            .map(str::to_string)
            .collect()
    }

    /// Last status telegram reported for `port`.
    pub fn port_status(&self, port: u8) -> Option<String> {
        self.state.metadata.lock().port_status(port).map(str::to_string)
    }

    /// Current bring-up phase.
    pub fn bootstrap_state(&self) -> BootstrapState {
        *self.state.bootstrap.lock()
    }

    /// False once the read loop stopped on a transport error or end of stream.
    pub fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::Acquire)
    }

    /// Why the read loop stopped, if it stopped on its own.
    pub fn last_error(&self) -> Option<String> {
        self.state.metadata.lock().last_error().map(str::to_string)
    }

    /// True once [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Write `data` to the transport.
    ///
    /// Writers are serialized; the bytes of one call are never interleaved
    /// with another's. No buffering and no retry.
    pub async fn write(&self, data: &[u8]) -> HatResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| HatError::Closed(self.name().to_string()))?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write `payload` as a binary frame: start byte, payload, end byte, `\r`.
    ///
    /// The whole frame goes out under one hold of the write lock. If the
    /// transport stops accepting payload bytes the upload is aborted with
    /// [`HatError::ShortWrite`].
    async fn write_frame(&self, payload: &[u8]) -> HatResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| HatError::Closed(self.name().to_string()))?;

        writer.write_all(&[FRAME_START]).await?;

        let mut written = 0;
        while written < payload.len() {
            let n = writer.write(&payload[written..]).await?;
            if n == 0 {
                return Err(HatError::ShortWrite {
                    written,
                    expected: payload.len(),
                });
            }
            written += n;
        }

        writer.write_all(FRAME_END).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Recent lines joined with a trailing newline each.
    pub fn last_lines_text(&self) -> String {
        self.state
            .metadata
            .lock()
            .last_lines()
            .fold(String::new(), |mut acc, line| {
                acc.push_str(line);
                acc.push('\n');
                acc
            })
    }

    /// Power down all ports, close the transport and stop the read loop.
    ///
    /// The shutdown commands are best effort. Calling `close` again is a
    /// no-op.
    pub async fn close(&self) -> HatResult<()> {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(connection = %self.name(), port = %self.path, "Closing Build HAT connection");

        for cmd in [power_off_all_command(), deselect_all_command()] {
            if let Err(e) = self.write(cmd.as_bytes()).await {
                tracing::debug!(connection = %self.name(), error = %e, "Shutdown command failed");
            }
        }

        let shutdown = match self.writer.lock().await.take() {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        };

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(connection = %self.name(), error = %e, "Read loop ended abnormally");
                }
            }
        }

        shutdown.map_err(HatError::from)
    }
}

impl Drop for HatConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for HatConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HatConnection")
            .field("name", &self.name())
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

/// Assemble `\r`-terminated lines until the transport ends or the connection
/// closes.
///
/// A run of more than [`MAX_LINE_LEN`] bytes without a terminator is dropped
/// up to and including the next `\r`.
async fn read_loop(read_half: ReadHalf<DynSerial>, state: Arc<SharedState>) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(256);
    let mut discarding = false;

    while !state.is_closed() {
        buf.clear();
        let chunk = (&mut reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(LINE_TERMINATOR, &mut buf)
            .await;
        match chunk {
            Ok(0) => {
                if !state.is_closed() {
                    state.mark_terminated("transport reached end of stream".to_string());
                }
                break;
            }
            Ok(n) if n > MAX_LINE_LEN && buf.last() != Some(&LINE_TERMINATOR) => {
                if !discarding {
                    tracing::warn!(connection = %state.name, limit = MAX_LINE_LEN, "Discarding overlong line");
                    discarding = true;
                }
            }
            Ok(_) if discarding => discarding = false,
            Ok(_) => state.handle_line(&String::from_utf8_lossy(&buf)),
            Err(e) => {
                if !state.is_closed() {
                    state.mark_terminated(format!("read error: {}", e));
                }
                break;
            }
        }
    }

    tracing::debug!(connection = %state.name, "Build HAT read loop stopped");
}

fn command_text(args: &serde_json::Value) -> Option<String> {
    match args {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map.get("cmd").and_then(command_text),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl Commandable for HatConnection {
    /// Diagnostic pass-through.
    ///
    /// - `"cmd"`: send the argument (a string, or `{"cmd": "..."}`) as a raw
    ///   protocol line; returns `{}`
    /// - `"lastLines"`: returns `{"lastLines": "<line>\n<line>\n..."}`
    async fn execute_command(
        &self,
        command: &str,
        args: serde_json::Value,
    ) -> HatResult<serde_json::Value> {
        match command {
            "cmd" => {
                let text = command_text(&args).ok_or_else(|| {
                    HatError::InvalidParameter("cmd requires a command string".to_string())
                })?;
                self.write(raw_command(&text).as_bytes()).await?;
                Ok(serde_json::json!({}))
            }
            "lastLines" => Ok(serde_json::json!({ "lastLines": self.last_lines_text() })),
            other => Err(HatError::UnknownCommand(other.to_string())),
        }
    }
}
