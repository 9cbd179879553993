//! One command at a time over the serial link: send it, collect the device's
//! status reports into the position log, and decide how the command ended.

use std::{
    io::{self, BufRead},
    time::{Duration, Instant},
};

use rig_protocol::{DeviceLine, Direction, MotorAxis, MoveCommand, Positions};
use tracing::{debug, error, info, instrument, warn};
use utilities::{
    cancel::CancelFlag,
    line_io::{LineReader, MAX_LINE_LEN, ReadEvent, SharedLineWriter},
};

use crate::rotating_log::{LogStore, RotatingLogger};

mod conversion;

pub use conversion::GearRatio;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Report interval must be at least 1")]
    InvalidReportInterval,

    #[error("Move of {degrees} degrees does not fit in one command")]
    MoveTooLarge { degrees: f64 },

    #[error("Failed to send command: {0}")]
    Send(io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The device stopped on its own initiative.
    EmergencyStop,
    /// The operator asked for a stop.
    Operator,
    /// The device refused the command.
    Rejected,
    EndOfStream,
    ConnectionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled(CancelReason),
}

impl SessionOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionOutcome::Cancelled(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub axis: MotorAxis,
    /// Signed stage rotation. Negative values run in reverse.
    pub degrees: f64,
    pub step_delay_us: u32,
    pub report_interval: u32,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub command: MoveCommand,
    pub expected: u32,
    pub received: u32,
    /// Status reports that could not be written to the position log.
    pub unrecorded: u32,
    /// Last device-relative positions reported for this command.
    pub last_position: Option<Positions>,
}

pub trait Clock {
    fn now_us(&self) -> i64;
}

/// Wall-clock time in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

pub struct SerialSession<R, S, C = SystemClock> {
    reader: LineReader<R>,
    writer: SharedLineWriter,
    cancel: CancelFlag,
    logger: RotatingLogger<S>,
    clock: C,
    gear: GearRatio,
    drain_timeout: Duration,
}

impl<R: BufRead, S: LogStore> SerialSession<R, S, SystemClock> {
    pub fn new(
        reader: R,
        writer: SharedLineWriter,
        cancel: CancelFlag,
        logger: RotatingLogger<S>,
        gear: GearRatio,
    ) -> Self {
        Self {
            reader: LineReader::new(reader),
            writer,
            cancel,
            logger,
            clock: SystemClock,
            gear,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl<R: BufRead, S: LogStore, C: Clock> SerialSession<R, S, C> {
    pub fn with_clock<T: Clock>(self, clock: T) -> SerialSession<R, S, T> {
        SerialSession {
            reader: self.reader,
            writer: self.writer,
            cancel: self.cancel,
            logger: self.logger,
            clock,
            gear: self.gear,
            drain_timeout: self.drain_timeout,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn logger(&self) -> &RotatingLogger<S> {
        &self.logger
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn gear(&self) -> GearRatio {
        self.gear
    }

    pub fn build_command(&self, request: &MoveRequest) -> Result<MoveCommand, SessionError> {
        let pulse_count =
            self.gear
                .pulses_for(request.degrees)
                .ok_or(SessionError::MoveTooLarge {
                    degrees: request.degrees,
                })?;

        MoveCommand::new(
            request.axis,
            request.step_delay_us,
            pulse_count,
            Direction::from_degrees(request.degrees),
            request.report_interval,
        )
        .map_err(|_| SessionError::InvalidReportInterval)
    }

    /// Runs one command to its end.
    ///
    /// Returns once every expected report has arrived, the device announces
    /// an emergency stop, or the link goes away. After a cancellation is
    /// seen the session keeps reading until the device confirms the stop or
    /// the drain timeout runs out, so trailing reports still reach the log.
    #[instrument(skip(self, request), fields(axis = %request.axis, degrees = request.degrees))]
    pub fn execute(&mut self, request: &MoveRequest) -> Result<SessionReport, SessionError> {
        let command = self.build_command(request)?;
        let mut report = SessionReport {
            outcome: SessionOutcome::Completed,
            command,
            expected: command.expected_reports(),
            received: 0,
            unrecorded: 0,
            last_position: None,
        };

        let encoded = command.encode();
        info!(
            "Sending {} pulses to {} axis, expecting {} reports",
            command.pulse_count, command.axis, report.expected
        );
        // A stop requested from here on is written after the command, so the
        // device always sees the command first and answers with a final report.
        let sent = self
            .writer
            .write_line_unless(&self.cancel, &encoded)
            .map_err(SessionError::Send)?;
        if !sent {
            info!("Cancellation already requested, command not sent");
            report.outcome = SessionOutcome::Cancelled(CancelReason::Operator);
            return Ok(report);
        }

        let mut recording = true;
        let mut draining = false;
        let mut drain_deadline: Option<Instant> = None;

        report.outcome = loop {
            if !draining && self.cancel.is_signaled() {
                warn!("Cancellation requested, waiting for the device to stop");
                draining = true;
                // None when the timeout reaches past what Instant can hold:
                // wait for the device however long it takes.
                drain_deadline = Instant::now().checked_add(self.drain_timeout);
            }
            if drain_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!("Device did not confirm the stop within {:?}", self.drain_timeout);
                break SessionOutcome::Cancelled(CancelReason::Operator);
            }

            let line = match self.reader.next_event() {
                Ok(ReadEvent::Line(line)) => line,
                Ok(ReadEvent::Truncated(head)) => {
                    warn!(
                        "Dropping device line longer than {} bytes: {:?}...",
                        MAX_LINE_LEN,
                        head.get(..32).unwrap_or(&head)
                    );
                    continue;
                }
                Ok(ReadEvent::Idle) => continue,
                Ok(ReadEvent::Closed) => {
                    warn!("Device closed the link");
                    break SessionOutcome::Cancelled(CancelReason::EndOfStream);
                }
                Err(e) => {
                    warn!("Failed to read from device: {}", e);
                    break SessionOutcome::Cancelled(CancelReason::ConnectionLost);
                }
            };

            match DeviceLine::classify(&line) {
                DeviceLine::Status(positions) => {
                    report.received += 1;
                    report.last_position = Some(positions);
                    self.record(positions, &mut recording, &mut report);

                    if !draining && report.received >= report.expected {
                        break SessionOutcome::Completed;
                    }
                }
                DeviceLine::EmergencyStop => {
                    let reason = if draining {
                        CancelReason::Operator
                    } else {
                        CancelReason::EmergencyStop
                    };
                    break SessionOutcome::Cancelled(reason);
                }
                DeviceLine::Rejected(raw) if raw == encoded => {
                    error!("Device rejected the command: {}", raw);
                    break SessionOutcome::Cancelled(CancelReason::Rejected);
                }
                DeviceLine::Rejected(raw) => warn!("Device rejected a line: {}", raw),
                DeviceLine::Unrecognized(raw) => debug!("Ignoring device line: {:?}", raw),
            }
        };

        match report.outcome {
            SessionOutcome::Completed => info!(
                "Command completed after {} reports at {:?}",
                report.received, report.last_position
            ),
            SessionOutcome::Cancelled(reason) => warn!(
                "Command cancelled ({:?}) after {} of {} reports at {:?}",
                reason, report.received, report.expected, report.last_position
            ),
        }
        if report.unrecorded > 0 {
            error!("{} status reports were not logged", report.unrecorded);
        }

        Ok(report)
    }

    fn record(&mut self, positions: Positions, recording: &mut bool, report: &mut SessionReport) {
        if !*recording {
            report.unrecorded += 1;
            return;
        }

        let timestamp_us = self.clock.now_us();
        match self.logger.append(timestamp_us, positions) {
            Ok(record) => debug!(
                "Logged az={} el={}",
                record.positions.azimuth, record.positions.elevation
            ),
            Err(e) => {
                // Stop trying for the rest of this command; motion carries on.
                error!("Position logging disabled for this command: {}", e);
                *recording = false;
                report.unrecorded += 1;
            }
        }
    }
}
