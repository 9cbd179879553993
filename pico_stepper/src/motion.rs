use embedded_hal::delay::DelayNs;
use rig_protocol::{EMERGENCY_STOP_LINE, MAX_STATUS_LEN, MotorAxis, MoveCommand, Positions};

use crate::{link::DeviceLink, stepper::PulseDriver};

/// Both motors of the rig. Commands are serialized, so whichever axis the
/// current command names is the only one being mutated.
pub struct Axes<E, A> {
    pub elevation: E,
    pub azimuth: A,
}

impl<E: PulseDriver, A: PulseDriver> Axes<E, A> {
    pub fn new(elevation: E, azimuth: A) -> Self {
        Self { elevation, azimuth }
    }

    pub fn positions(&self) -> Positions {
        Positions::new(
            i64::from(self.azimuth.position()),
            i64::from(self.elevation.position()),
        )
    }

    fn prepare(&mut self, command: &MoveCommand) {
        match command.axis {
            MotorAxis::Elevation => prepare(&mut self.elevation, command),
            MotorAxis::Azimuth => prepare(&mut self.azimuth, command),
        }
    }

    fn step(&mut self, axis: MotorAxis, delay: &mut impl DelayNs) {
        match axis {
            MotorAxis::Elevation => self.elevation.step(delay),
            MotorAxis::Azimuth => self.azimuth.step(delay),
        }
    }

    fn disable(&mut self, axis: MotorAxis) {
        match axis {
            MotorAxis::Elevation => self.elevation.disable(),
            MotorAxis::Azimuth => self.azimuth.disable(),
        }
    }
}

fn prepare(driver: &mut impl PulseDriver, command: &MoveCommand) {
    driver.set_step_delay_us(command.step_delay_us);
    driver.set_direction(command.direction);
    driver.enable();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Running { pulse: u32 },
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    Completed { pulses: u32 },
    /// `trigger` is the inbound byte that interrupted the run.
    Cancelled { pulses: u32, trigger: u8 },
}

/// Pulse generation for one command at a time.
///
/// Cancellation is sampled after every pulse and never during the pulse
/// hold, so a stop request takes effect within one pulse period
/// (`2 * step_delay`) plus the time to write one status line.
pub struct MotionLoop {
    state: MotionState,
    reports: u32,
}

impl Default for MotionLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionLoop {
    pub fn new() -> Self {
        Self {
            state: MotionState::Idle,
            reports: 0,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Status lines emitted by the most recent command.
    pub fn reports_sent(&self) -> u32 {
        self.reports
    }

    pub fn execute<E, A, L, D>(
        &mut self,
        command: &MoveCommand,
        axes: &mut Axes<E, A>,
        link: &mut L,
        delay: &mut D,
    ) -> MotionOutcome
    where
        E: PulseDriver,
        A: PulseDriver,
        L: DeviceLink,
        D: DelayNs,
    {
        let report_interval = command.report_interval.get();
        let mut interrupted = None;

        self.reports = 0;
        axes.prepare(command);
        self.state = MotionState::Running { pulse: 0 };

        for pulse in 1..=command.pulse_count {
            axes.step(command.axis, delay);
            self.state = MotionState::Running { pulse };

            if pulse % report_interval == 0 {
                self.report(axes, link);
            }

            if let Some(trigger) = link.poll_byte() {
                interrupted = Some(MotionOutcome::Cancelled { pulses: pulse, trigger });
                break;
            }
        }

        // The final report goes out exactly once per command, even when the
        // last pulse index already produced a periodic report.
        self.report(axes, link);

        let outcome = match interrupted {
            Some(outcome) => {
                link.write_line(EMERGENCY_STOP_LINE);
                self.state = MotionState::Cancelled;
                log::warn!("{} move cancelled: {:?}", command.axis, outcome);
                outcome
            }
            None => {
                self.state = MotionState::Completed;
                log::debug!("{} move completed", command.axis);
                MotionOutcome::Completed {
                    pulses: command.pulse_count,
                }
            }
        };

        axes.disable(command.axis);
        self.state = MotionState::Idle;

        outcome
    }

    fn report<E, A, L>(&mut self, axes: &Axes<E, A>, link: &mut L)
    where
        E: PulseDriver,
        A: PulseDriver,
        L: DeviceLink,
    {
        let mut line: heapless::String<MAX_STATUS_LEN> = heapless::String::new();
        // Sized for the widest pair of positions, so this cannot run out.
        let _ = axes.positions().write_status(&mut line);
        link.write_line(&line);
        self.reports += 1;
    }
}
