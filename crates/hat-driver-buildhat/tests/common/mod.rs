//! Shared test harness: a channel-backed mock serial port wired to a
//! simulated Build HAT.
//!
//! The simulated HAT parses the `\r`-terminated command stream (including
//! binary frames), records everything it receives and answers the way the
//! real firmware and bootloader do.

#![allow(dead_code)]

use async_trait::async_trait;
use hat_core::error::{HatError, HatResult};
use hat_core::serial::{DynSerial, SerialOpener};
use hat_driver_buildhat::{BootstrapTiming, ConnectionOptions, FirmwareBundle, FirmwareSource};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const NORMAL_BANNER: &str = "Firmware version: 1636109636 2021-11-05T10:47:16+00:00";
pub const BOOTLOADER_BANNER: &str = "BuildHAT bootloader version 1.0 2021-10-25T10:34:02+00:00";
pub const UPLOAD_TELEGRAM: &str = "P1: connected to active ID 38";

// =============================================================================
// Mock Serial Port
// =============================================================================

/// Client-facing side of the mock serial port.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
    /// Total bytes accepted before writes start returning 0
    write_budget: Option<usize>,
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_buffer.is_empty() {
            match self.reads_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.read_buffer.extend(chunk),
                Poll::Ready(None) => return Poll::Ready(Ok(())), // EOF
                Poll::Pending => return Poll::Pending,
            }
        }

        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let accepted = match self.write_budget {
            Some(budget) => std::cmp::min(budget, buf.len()),
            None => buf.len(),
        };
        if let Some(budget) = self.write_budget.as_mut() {
            *budget -= accepted;
        }
        if accepted == 0 {
            return Poll::Ready(Ok(0));
        }

        match self.writes_tx.send(buf[..accepted].to_vec()) {
            Ok(_) => Poll::Ready(Ok(accepted)),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated HAT disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// =============================================================================
// Simulated Build HAT
// =============================================================================

/// How the simulated HAT behaves.
#[derive(Debug, Clone, Default)]
pub struct HatBehavior {
    /// Report the bootloader banner until a firmware upload and reboot
    pub boots_in_bootloader: bool,
    /// Keep reporting the bootloader banner even after a reboot
    pub stays_in_bootloader: bool,
    /// Never answer `version`
    pub silent: bool,
    /// Do not print "Done initialising ports" after reboot
    pub no_reboot_confirmation: bool,
    /// Bytes accepted by the transport before writes stall
    pub write_budget: Option<usize>,
    /// Push port telegrams while a firmware upload is in progress
    pub telegram_during_upload: bool,
}

impl HatBehavior {
    pub fn normal() -> Self {
        Self::default()
    }

    pub fn bootloader() -> Self {
        Self {
            boots_in_bootloader: true,
            ..Self::default()
        }
    }
}

/// Everything the simulated HAT received.
#[derive(Debug, Default)]
pub struct HatLog {
    pub commands: Vec<String>,
    pub frames: Vec<Vec<u8>>,
    pub disconnected: bool,
}

impl HatLog {
    pub fn count(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub type SharedLog = Arc<Mutex<HatLog>>;

enum ParseState {
    Line(Vec<u8>),
    Frame { expected: usize, data: Vec<u8> },
    Trailer { data: Vec<u8>, seen_etx: bool },
}

struct SimulatedHat {
    behavior: HatBehavior,
    in_bootloader: bool,
    pending_len: usize,
    reads_tx: UnboundedSender<Vec<u8>>,
    log: SharedLog,
}

impl SimulatedHat {
    fn send(&self, line: &str) {
        let _ = self.reads_tx.send(format!("{}\r", line).into_bytes());
    }

    fn handle_command(&mut self, cmd: &str) {
        self.log.lock().unwrap().commands.push(cmd.to_string());

        if self.in_bootloader {
            self.send(&format!("BHBL>{}", cmd));
        }

        let mut words = cmd.split_whitespace();
        match words.next() {
            Some("version") if !self.behavior.silent => {
                if self.in_bootloader {
                    self.send(BOOTLOADER_BANNER);
                } else {
                    self.send(NORMAL_BANNER);
                    self.send("P0: connected to active ID 30");
                }
            }
            Some("load") | Some("signature") => {
                self.pending_len = words.next().and_then(|n| n.parse().ok()).unwrap_or(0);
                if self.behavior.telegram_during_upload {
                    self.send(UPLOAD_TELEGRAM);
                    self.send("P0: disconnected");
                }
            }
            Some("reboot") => {
                if !self.behavior.stays_in_bootloader {
                    self.in_bootloader = false;
                }
                if !self.behavior.no_reboot_confirmation {
                    self.send("Firmware update done");
                    self.send("Done initialising ports");
                }
            }
            _ => {}
        }
    }

    fn feed(&mut self, state: ParseState, byte: u8) -> ParseState {
        match state {
            ParseState::Line(mut buf) => {
                if byte == 0x02 {
                    return if self.pending_len == 0 {
                        ParseState::Trailer {
                            data: Vec::new(),
                            seen_etx: false,
                        }
                    } else {
                        ParseState::Frame {
                            expected: self.pending_len,
                            data: Vec::new(),
                        }
                    };
                }
                if byte == b'\r' {
                    let line = String::from_utf8_lossy(&buf).trim().to_string();
                    if !line.is_empty() {
                        self.handle_command(&line);
                    }
                    buf.clear();
                } else {
                    buf.push(byte);
                }
                ParseState::Line(buf)
            }
            ParseState::Frame { expected, mut data } => {
                data.push(byte);
                if data.len() == expected {
                    ParseState::Trailer {
                        data,
                        seen_etx: false,
                    }
                } else {
                    ParseState::Frame { expected, data }
                }
            }
            ParseState::Trailer { data, seen_etx } => match (seen_etx, byte) {
                (false, 0x03) => ParseState::Trailer {
                    data,
                    seen_etx: true,
                },
                (true, b'\r') => {
                    self.log.lock().unwrap().frames.push(data);
                    self.pending_len = 0;
                    ParseState::Line(Vec::new())
                }
                _ => ParseState::Trailer { data, seen_etx },
            },
        }
    }
}

/// Create a mock port wired to a simulated HAT running on the current runtime.
pub fn simulated_hat(behavior: HatBehavior) -> (MockSerialPort, SharedLog) {
    let (writes_tx, mut writes_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (reads_tx, reads_rx) = mpsc::unbounded_channel();
    let log: SharedLog = Arc::new(Mutex::new(HatLog::default()));

    let port = MockSerialPort {
        writes_tx,
        reads_rx,
        read_buffer: VecDeque::new(),
        write_budget: behavior.write_budget,
    };

    let mut hat = SimulatedHat {
        in_bootloader: behavior.boots_in_bootloader,
        behavior,
        pending_len: 0,
        reads_tx,
        log: log.clone(),
    };

    tokio::spawn(async move {
        let mut state = ParseState::Line(Vec::new());
        while let Some(chunk) = writes_rx.recv().await {
            for byte in chunk {
                state = hat.feed(state, byte);
            }
        }
        hat.log.lock().unwrap().disconnected = true;
    });

    (port, log)
}

/// Poll `log` until `cond` holds, for at most one second.
pub async fn wait_for(log: &SharedLog, cond: impl Fn(&HatLog) -> bool) -> bool {
    for _ in 0..100 {
        if cond(&log.lock().unwrap()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Wait until the simulated HAT sees its port dropped.
pub async fn wait_disconnected(log: &SharedLog) -> bool {
    wait_for(log, |l| l.disconnected).await
}

/// Firmware bundle with recognisable contents.
pub fn test_firmware() -> FirmwareSource {
    let image: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let signature = vec![0xA5u8; 64];
    FirmwareSource::Bundle(FirmwareBundle::new(image, signature))
}

/// Connection options for tests: fast timing and in-memory firmware.
pub fn test_options() -> ConnectionOptions {
    ConnectionOptions {
        timing: fast_timing(),
        firmware: test_firmware(),
        ..ConnectionOptions::default()
    }
}

// =============================================================================
// Opener and timing helpers
// =============================================================================

/// Opener handing out simulated HATs and counting opens.
#[derive(Default)]
pub struct MockOpener {
    pub behavior: HatBehavior,
    pub fail_open: bool,
    pub opens: AtomicUsize,
    pub logs: Mutex<Vec<(String, SharedLog)>>,
}

impl MockOpener {
    pub fn new(behavior: HatBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn log_for(&self, path: &str) -> Option<SharedLog> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, log)| log.clone())
    }
}

#[async_trait]
impl SerialOpener for MockOpener {
    async fn open(&self, path: &str) -> HatResult<DynSerial> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(HatError::Open {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
            });
        }
        let (port, log) = simulated_hat(self.behavior.clone());
        self.logs.lock().unwrap().push((path.to_string(), log));
        Ok(Box::new(port))
    }
}

/// Bootstrap timing shrunk for tests.
pub fn fast_timing() -> BootstrapTiming {
    BootstrapTiming {
        startup_settle: Duration::from_millis(5),
        version_query_delay: Duration::from_millis(5),
        version_poll_interval: Duration::from_millis(10),
        version_poll_attempts: 30,
        upload_settle: Duration::from_millis(5),
        confirm_poll_interval: Duration::from_millis(10),
        confirm_poll_attempts: 30,
        reboot_settle: Duration::from_millis(10),
    }
}
