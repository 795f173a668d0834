//! Protocol metadata collected by the read loop.
//!
//! Everything here lives behind one mutex in [`super::SharedState`]. The read
//! loop is the only writer outside bootstrap; diagnostic callers and the
//! bootstrap polling waits read it.

use crate::protocol::{classify, LineEvent};
use std::collections::{HashMap, VecDeque};

/// Default number of unclassified lines kept.
pub const DEFAULT_LINE_HISTORY: usize = 5;

/// What applying one line changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank line or prompt echo.
    Ignored,
    /// New version banner.
    Version(String),
    /// Port status differs from the previous telegram.
    PortChanged {
        /// Port index.
        port: u8,
        /// New status text.
        status: String,
    },
    /// Port status repeated.
    PortUnchanged {
        /// Port index.
        port: u8,
    },
    /// `P` line that is not a usable telegram.
    Malformed(String),
    /// Free text appended to the history.
    Recorded(String),
}

/// Version, recent lines, port status and last error of one connection.
#[derive(Debug)]
pub struct ProtocolMetadata {
    version: String,
    last_lines: VecDeque<String>,
    capacity: usize,
    port_status: HashMap<u8, String>,
    last_error: Option<String>,
}

impl ProtocolMetadata {
    /// Empty metadata keeping up to `capacity` free-text lines.
    ///
    /// A zero capacity is bumped to 1 so wait-for-line checks stay possible.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            version: String::new(),
            last_lines: VecDeque::with_capacity(capacity),
            capacity,
            port_status: HashMap::new(),
            last_error: None,
        }
    }

    /// Classify `line` and fold it into the metadata.
    pub fn apply_line(&mut self, line: &str) -> LineOutcome {
        match classify(line) {
            LineEvent::Empty | LineEvent::Prompt => LineOutcome::Ignored,
            LineEvent::Version(version) => {
                self.version = version.to_string();
                LineOutcome::Version(self.version.clone())
            }
            LineEvent::PortStatus { port, status } => {
                match self.port_status.insert(port, status.to_string()) {
                    Some(old) if old == status => LineOutcome::PortUnchanged { port },
                    _ => LineOutcome::PortChanged {
                        port,
                        status: status.to_string(),
                    },
                }
            }
            LineEvent::MalformedPort(line) => LineOutcome::Malformed(line.to_string()),
            LineEvent::Unclassified(line) => {
                self.push_line(line.to_string());
                LineOutcome::Recorded(line.to_string())
            }
        }
    }

    fn push_line(&mut self, line: String) {
        while self.last_lines.len() >= self.capacity {
            self.last_lines.pop_front();
        }
        self.last_lines.push_back(line);
    }

    /// Latest version banner, empty until one arrives.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Forget the banner before re-querying.
    pub fn clear_version(&mut self) {
        self.version.clear();
    }

    /// Remembered free-text lines, oldest first.
    pub fn last_lines(&self) -> impl Iterator<Item = &str> {
        self.last_lines.iter().map(String::as_str)
    }

    /// History capacity after clamping.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether any remembered line contains `needle`.
    pub fn has_line_containing(&self, needle: &str) -> bool {
        self.last_lines.iter().any(|l| l.contains(needle))
    }

    /// Last status telegram for `port`.
    pub fn port_status(&self, port: u8) -> Option<&str> {
        self.port_status.get(&port).map(String::as_str)
    }

    /// Why the read loop stopped, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a terminal read-loop error.
    pub fn set_last_error(&mut self, error: String) {
        self.last_error = Some(error);
    }
}
