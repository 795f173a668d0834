//! Build HAT wire protocol: line classification and command formatting.
//!
//! Protocol: ASCII over UART, 115200 baud, every command and every reply
//! terminated by a single carriage return (`\r`, no line feed).
//!
//! Inbound lines fall into a few classes:
//!
//! | Line | Meaning |
//! |------|---------|
//! | `BHBL>...` | prompt or command echo, ignored |
//! | `... version ...` | firmware or bootloader version banner |
//! | `P<digit><status>` | unsolicited per-port status telegram |
//! | anything else | free text, kept in the recent-line history |
//!
//! Binary payloads (firmware image, signature) are framed as
//! `0x02` + raw bytes + `0x03` + `\r`.

/// Line terminator for both directions.
pub const LINE_TERMINATOR: u8 = b'\r';

/// Start-of-text byte opening a binary frame.
pub const FRAME_START: u8 = 0x02;

/// End-of-text byte plus terminator closing a binary frame.
pub const FRAME_END: &[u8] = &[0x03, LINE_TERMINATOR];

/// Number of physical motor ports.
pub const NUM_PORTS: u8 = 4;

/// Prefix of prompt and echo lines.
pub const PROMPT_MARKER: &str = "BHBL>";

/// Substring identifying a version banner.
pub const VERSION_MARKER: &str = " version";

/// Substring of the version banner printed while in bootloader mode.
pub const BOOTLOADER_MARKER: &str = "bootloader";

/// Line printed by freshly booted firmware once the ports are up.
pub const INIT_DONE_MARKER: &str = "Done initialising ports";

/// Ask for the version banner.
pub const VERSION_QUERY: &[u8] = b"version\r";
/// Disable command echo.
pub const ECHO_OFF: &[u8] = b"echo 0\r";
/// Clear the bootloader's upload buffer.
pub const CLEAR: &[u8] = b"clear\r";
/// Restart the HAT.
pub const REBOOT: &[u8] = b"reboot\r";

/// Longest inbound line kept; longer runs without `\r` are dropped.
pub const MAX_LINE_LEN: usize = 4096;

/// Classified inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent<'a> {
    /// Blank after trimming.
    Empty,
    /// Prompt or command echo.
    Prompt,
    /// Version banner, full text preserved.
    Version(&'a str),
    /// Port status telegram.
    PortStatus {
        /// Port index, `0..NUM_PORTS`.
        port: u8,
        /// Text after the port digit.
        status: &'a str,
    },
    /// Starts with `P` but is not a usable telegram.
    MalformedPort(&'a str),
    /// Free text.
    Unclassified(&'a str),
}

/// Classify one line of peripheral output.
///
/// Surrounding whitespace (including the `\r` terminator) is ignored.
pub fn classify(line: &str) -> LineEvent<'_> {
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Empty;
    }

    if line.starts_with(PROMPT_MARKER) {
        return LineEvent::Prompt;
    }

    if line.contains(VERSION_MARKER) {
        return LineEvent::Version(line);
    }

    let bytes = line.as_bytes();
    if bytes[0] == b'P' {
        if bytes.len() <= 3 {
            return LineEvent::MalformedPort(line);
        }
        return match port_digit(bytes[1]) {
            Some(port) => LineEvent::PortStatus {
                port,
                status: &line[2..],
            },
            None => LineEvent::MalformedPort(line),
        };
    }

    LineEvent::Unclassified(line)
}

fn port_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' if byte - b'0' < NUM_PORTS => Some(byte - b'0'),
        _ => None,
    }
}

/// `load <length> <checksum>` announcing a firmware image.
pub fn load_command(length: usize, checksum: u32) -> String {
    format!("load {} {}\r", length, checksum)
}

/// `signature <length>` announcing the signature blob.
pub fn signature_command(length: usize) -> String {
    format!("signature {}\r", length)
}

/// Open-loop PWM command for one port, power rendered with 3 decimals.
pub fn set_power_command(port: u8, power: f64) -> String {
    format!("port {}; plimit 1; select 0; pwm; set {:.3}\r", port, power)
}

/// Power off and coast every port.
pub fn power_off_all_command() -> String {
    let parts: Vec<String> = (0..NUM_PORTS)
        .map(|p| format!("port {} ; pwm off ; coast ; off", p))
        .collect();
    format!("{}\r", parts.join(" ; "))
}

/// Deselect every port and disable echo.
pub fn deselect_all_command() -> String {
    let parts: Vec<String> = (0..NUM_PORTS)
        .map(|p| format!("port {} ; select", p))
        .collect();
    format!("{} ; echo 0\r", parts.join(" ; "))
}

/// Raw pass-through command: trimmed and terminated.
pub fn raw_command(cmd: &str) -> String {
    format!("{}\r", cmd.trim())
}
