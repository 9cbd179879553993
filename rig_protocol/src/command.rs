use core::{fmt, num::NonZeroU32, str::FromStr};

use crate::CodecError;

/// Field names of a move command, in wire order.
const FIELDS: [&str; 5] = ["delay", "pulses", "dir", "report", "motor"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorAxis {
    Elevation,
    Azimuth,
}

impl MotorAxis {
    /// Wire selector used in the `motor` field.
    pub fn selector(self) -> u8 {
        match self {
            MotorAxis::Elevation => 0,
            MotorAxis::Azimuth => 1,
        }
    }

    pub fn from_selector(selector: u32) -> Option<Self> {
        match selector {
            0 => Some(MotorAxis::Elevation),
            1 => Some(MotorAxis::Azimuth),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MotorAxis::Elevation => "elevation",
            MotorAxis::Azimuth => "azimuth",
        }
    }
}

impl fmt::Display for MotorAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    /// Positive values move forward, anything else moves in reverse.
    pub fn from_wire(value: i64) -> Self {
        if value > 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// Zero counts as forward.
    pub fn from_degrees(degrees: f64) -> Self {
        if degrees >= 0.0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCommand {
    pub axis: MotorAxis,
    /// Half of the pulse period, in microseconds.
    pub step_delay_us: u32,
    pub pulse_count: u32,
    pub direction: Direction,
    pub report_interval: NonZeroU32,
}

impl MoveCommand {
    pub fn new(
        axis: MotorAxis,
        step_delay_us: u32,
        pulse_count: u32,
        direction: Direction,
        report_interval: u32,
    ) -> Result<Self, CodecError> {
        let report_interval =
            NonZeroU32::new(report_interval).ok_or(CodecError::ZeroReportInterval)?;

        Ok(Self {
            axis,
            step_delay_us,
            pulse_count,
            direction,
            report_interval,
        })
    }

    /// Status lines the device sends for this command when it runs to
    /// completion: one per full report interval plus the final report.
    pub fn expected_reports(&self) -> u32 {
        self.pulse_count / self.report_interval.get() + 1
    }

    /// Signed change of the axis position once every pulse has run.
    pub fn displacement(&self) -> i64 {
        i64::from(self.pulse_count) * i64::from(self.direction.sign())
    }

    #[cfg(feature = "std")]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parses one command line. All five fields must be present, in order,
    /// with optional whitespace between tokens.
    pub fn decode(line: &str) -> Result<Self, CodecError> {
        // The whole line has to match before any number is looked at.
        let [delay, pulses, dir, report, motor] =
            split_fields(line).ok_or(CodecError::Malformed)?;

        let step_delay_us = parse_field::<u32>("delay", delay)?;
        let pulse_count = parse_field::<u32>("pulses", pulses)?;
        let direction = Direction::from_wire(parse_field::<i64>("dir", dir)?);
        let report_interval = parse_field::<u32>("report", report)?;
        let selector = parse_field::<u32>("motor", motor)?;
        let axis = MotorAxis::from_selector(selector).ok_or(CodecError::InvalidAxis(selector))?;

        Self::new(axis, step_delay_us, pulse_count, direction, report_interval)
    }
}

/// Wire form of the command, without the line terminator.
impl fmt::Display for MoveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\"delay\":{},\"pulses\":{},\"dir\":{},\"report\":{},\"motor\":{}}}",
            self.step_delay_us,
            self.pulse_count,
            self.direction.sign(),
            self.report_interval,
            self.axis.selector()
        )
    }
}

/// Matches `{"delay":N,"pulses":N,"dir":[-]N,"report":N,"motor":N}` and
/// returns the five number tokens. Only `dir` may carry a sign.
fn split_fields(line: &str) -> Option<[&str; 5]> {
    let mut tokens = Tokens(line);
    let mut values = [""; 5];

    tokens.punct('{')?;
    for (index, name) in FIELDS.iter().enumerate() {
        if index > 0 {
            tokens.punct(',')?;
        }
        tokens.key(name)?;
        tokens.punct(':')?;
        values[index] = tokens.number(*name == "dir")?;
    }
    tokens.punct('}')?;

    tokens.rest().is_empty().then_some(values)
}

struct Tokens<'a>(&'a str);

impl<'a> Tokens<'a> {
    fn rest(&mut self) -> &'a str {
        self.0 = self.0.trim_start_matches(|c: char| c.is_ascii_whitespace());
        self.0
    }

    fn punct(&mut self, c: char) -> Option<()> {
        self.0 = self.rest().strip_prefix(c)?;
        Some(())
    }

    fn key(&mut self, name: &str) -> Option<()> {
        self.0 = self
            .rest()
            .strip_prefix('"')?
            .strip_prefix(name)?
            .strip_prefix('"')?;
        Some(())
    }

    fn number(&mut self, signed: bool) -> Option<&'a str> {
        let rest = self.rest();
        let sign = usize::from(signed && rest.starts_with('-'));
        let digits = rest[sign..].bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }

        let (number, rest) = rest.split_at(sign + digits);
        self.0 = rest;
        Some(number)
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, CodecError> {
    value
        .parse::<T>()
        .map_err(|_| CodecError::InvalidNumber { field })
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn command(axis: MotorAxis, pulses: u32, direction: Direction, report: u32) -> MoveCommand {
        MoveCommand::new(axis, 225, pulses, direction, report).unwrap()
    }

    #[test]
    fn encodes_fields_in_wire_order() {
        let cmd = command(MotorAxis::Azimuth, 400, Direction::Reverse, 100);
        assert_eq!(
            cmd.encode(),
            r#"{"delay":225,"pulses":400,"dir":-1,"report":100,"motor":1}"#
        );
    }

    #[test]
    fn decodes_host_encoding() {
        let cmd = command(MotorAxis::Elevation, 90_400, Direction::Forward, 100);
        assert_eq!(MoveCommand::decode(&cmd.encode()), Ok(cmd));
    }

    #[test]
    fn decodes_with_whitespace_and_line_ending() {
        let cmd = MoveCommand::decode(
            "{\"delay\": 10, \"pulses\": 5, \"dir\": 0, \"report\": 2, \"motor\": 0}\r\n",
        )
        .unwrap();
        assert_eq!(cmd.step_delay_us, 10);
        assert_eq!(cmd.pulse_count, 5);
        assert_eq!(cmd.direction, Direction::Reverse);
        assert_eq!(cmd.axis, MotorAxis::Elevation);
    }

    #[test]
    fn rejects_zero_report_interval() {
        let line = r#"{"delay":225,"pulses":400,"dir":1,"report":0,"motor":0}"#;
        assert_eq!(MoveCommand::decode(line), Err(CodecError::ZeroReportInterval));
        assert_eq!(
            MoveCommand::new(MotorAxis::Azimuth, 1, 1, Direction::Forward, 0),
            Err(CodecError::ZeroReportInterval)
        );
    }

    #[test]
    fn rejects_reordered_or_missing_fields() {
        for line in [
            r#"{"pulses":400,"delay":225,"dir":1,"report":100,"motor":0}"#,
            r#"{"delay":225,"pulses":400,"dir":1,"report":100}"#,
            r#"{"delay":225,"pulses":400,"dir":1,"report":100,"motor":0,"extra":1}"#,
            r#"{"delay":-5,"pulses":400,"dir":1,"report":100,"motor":0}"#,
            "hello",
            "",
        ] {
            assert_eq!(
                MoveCommand::decode(line),
                Err(CodecError::Malformed),
                "accepted {line:?}"
            );
        }
    }

    #[test]
    fn only_direction_may_be_signed() {
        let cmd = MoveCommand::decode(
            " { \"delay\" : 1 , \"pulses\" : 2 , \"dir\" : -1 , \"report\" : 1 , \"motor\" : 1 } ",
        )
        .unwrap();
        assert_eq!(cmd.direction, Direction::Reverse);

        for line in [
            r#"{"delay":1,"pulses":-2,"dir":1,"report":1,"motor":1}"#,
            r#"{"delay":1,"pulses":2,"dir":1,"report":1,"motor":-1}"#,
            r#"{"delay":1,"pulses":2,"dir":+1,"report":1,"motor":1}"#,
            r#"{" delay":1,"pulses":2,"dir":1,"report":1,"motor":1}"#,
        ] {
            assert_eq!(MoveCommand::decode(line), Err(CodecError::Malformed), "accepted {line:?}");
        }
    }

    #[test]
    fn rejects_unknown_motor_and_overflow() {
        assert_eq!(
            MoveCommand::decode(r#"{"delay":1,"pulses":1,"dir":1,"report":1,"motor":2}"#),
            Err(CodecError::InvalidAxis(2))
        );
        assert_eq!(
            MoveCommand::decode(r#"{"delay":1,"pulses":99999999999,"dir":1,"report":1,"motor":0}"#),
            Err(CodecError::InvalidNumber { field: "pulses" })
        );
    }

    #[test]
    fn expected_reports_include_final_report() {
        assert_eq!(command(MotorAxis::Azimuth, 400, Direction::Forward, 100).expected_reports(), 5);
        assert_eq!(command(MotorAxis::Azimuth, 450, Direction::Forward, 100).expected_reports(), 5);
        assert_eq!(command(MotorAxis::Azimuth, 99, Direction::Forward, 100).expected_reports(), 1);
        assert_eq!(command(MotorAxis::Azimuth, 0, Direction::Forward, 1).expected_reports(), 1);
    }

    #[test]
    fn direction_from_degrees_treats_zero_as_forward() {
        assert_eq!(Direction::from_degrees(0.0), Direction::Forward);
        assert_eq!(Direction::from_degrees(-0.5), Direction::Reverse);
        assert_eq!(command(MotorAxis::Elevation, 7, Direction::Reverse, 1).displacement(), -7);
    }
}
