use core::{fmt, ops::Add};

use crate::{CodecError, STATUS_MARKER};
#[cfg(feature = "std")]
use crate::{EMERGENCY_STOP_LINE, REJECTED_PREFIX};

/// Longest status line: the marker, a space, two `i64` values and a comma.
pub const MAX_STATUS_LEN: usize = STATUS_MARKER.len() + 1 + 2 * 20 + 1;

/// Absolute step counts of both axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Positions {
    pub azimuth: i64,
    pub elevation: i64,
}

impl Positions {
    pub fn new(azimuth: i64, elevation: i64) -> Self {
        Self { azimuth, elevation }
    }

    /// Formats the status line into `out`, which needs room for
    /// [`MAX_STATUS_LEN`] bytes.
    pub fn write_status<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        write!(out, "{STATUS_MARKER} {},{}", self.azimuth, self.elevation)
    }

    #[cfg(feature = "std")]
    pub fn encode_status(&self) -> String {
        let mut line = String::with_capacity(MAX_STATUS_LEN);
        // Writing into a String cannot fail.
        let _ = self.write_status(&mut line);
        line
    }

    pub fn decode_status(line: &str) -> Result<Self, CodecError> {
        let body = line
            .trim()
            .strip_prefix(STATUS_MARKER)
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .ok_or(CodecError::MalformedStatus)?;
        let (azimuth, elevation) = body.trim().split_once(',').ok_or(CodecError::MalformedStatus)?;

        Ok(Self {
            azimuth: azimuth.trim().parse().map_err(|_| CodecError::MalformedStatus)?,
            elevation: elevation.trim().parse().map_err(|_| CodecError::MalformedStatus)?,
        })
    }
}

impl Add for Positions {
    type Output = Positions;

    fn add(self, rhs: Self) -> Self::Output {
        Positions {
            azimuth: self.azimuth + rhs.azimuth,
            elevation: self.elevation + rhs.elevation,
        }
    }
}

/// A line received from the device, as the host sees it.
#[cfg(feature = "std")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLine {
    Status(Positions),
    EmergencyStop,
    /// The device refused a command and echoed it back.
    Rejected(String),
    Unrecognized(String),
}

#[cfg(feature = "std")]
impl DeviceLine {
    pub fn classify(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.contains(EMERGENCY_STOP_LINE) {
            return DeviceLine::EmergencyStop;
        }

        if let Some(raw) = line.strip_prefix(REJECTED_PREFIX) {
            return DeviceLine::Rejected(raw.to_string());
        }

        match Positions::decode_status(line) {
            Ok(positions) => DeviceLine::Status(positions),
            Err(_) => DeviceLine::Unrecognized(line.to_string()),
        }
    }
}
