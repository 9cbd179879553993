//! Line-oriented wire vocabulary shared by the rig firmware and the host
//! session controller.
//!
//! Every record is one newline-terminated text line:
//!
//! * host → device move command: `{"delay":225,"pulses":400,"dir":1,"report":100,"motor":1}`
//! * stop, either direction: any line containing `STOP`
//! * device → host status: `STATUS <azimuth>,<elevation>`
//! * device → host emergency stop notice: `EMERGENCY STOP`
//! * device → host rejection: `bad cmd: <offending line>`
//!
//! Parsing and formatting work without an allocator so the firmware can use
//! them. The `std` feature adds owned encodings for the host.

#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt;

pub mod command;
pub mod status;

pub use command::{Direction, MotorAxis, MoveCommand};
#[cfg(feature = "std")]
pub use status::DeviceLine;
pub use status::{MAX_STATUS_LEN, Positions};

/// Substring that turns any line into a stop request.
pub const STOP_KEYWORD: &str = "STOP";
/// Stop line written by the host.
pub const STOP_LINE: &str = "[\"STOP\"]";
/// [`STOP_LINE`] with its terminator, for writers that cannot allocate.
pub const STOP_RECORD: &[u8] = b"[\"STOP\"]\n";
pub const EMERGENCY_STOP_LINE: &str = "EMERGENCY STOP";
pub const STATUS_MARKER: &str = "STATUS";
pub const REJECTED_PREFIX: &str = "bad cmd: ";
/// Printed once by the firmware when the link comes up.
pub const BOOT_BANNER: &str = "connected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Line does not match the move command grammar")]
    Malformed,

    #[error("Field `{field}` is out of range")]
    InvalidNumber { field: &'static str },

    #[error("Unknown motor selector {0}")]
    InvalidAxis(u32),

    #[error("Report interval must be at least 1")]
    ZeroReportInterval,

    #[error("Malformed status line")]
    MalformedStatus,
}

/// True when the raw line must be treated as a stop request.
///
/// This is a plain substring match over the raw bytes: it cannot be escaped
/// and it wins over any other interpretation of the line.
pub fn is_stop(line: impl AsRef<[u8]>) -> bool {
    line.as_ref()
        .windows(STOP_KEYWORD.len())
        .any(|window| window == STOP_KEYWORD.as_bytes())
}

/// Diagnostic echoed back by the device for a line it refused. Bytes that
/// are not UTF-8 show up as `?`.
#[derive(Debug, Clone, Copy)]
pub struct Rejection<'a>(pub &'a [u8]);

impl fmt::Display for Rejection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REJECTED_PREFIX)?;
        for chunk in self.0.trim_ascii_end().utf8_chunks() {
            f.write_str(chunk.valid())?;
            if !chunk.invalid().is_empty() {
                f.write_str("?")?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
pub fn rejection_notice(raw: &str) -> String {
    Rejection(raw.as_bytes()).to_string()
}
