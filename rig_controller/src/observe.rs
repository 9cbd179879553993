//! Move sequences built on top of single-command sessions: the one-shot
//! azimuth/elevation move and the repeating observation sweep.

use std::io::BufRead;

use rig_protocol::MotorAxis;
use tracing::info;

use crate::{
    config::MotionConfig,
    rotating_log::LogStore,
    session::{Clock, MoveRequest, SerialSession, SessionError, SessionReport},
};

/// Endless sweep: a full azimuth turn, an elevation step, the azimuth turn
/// back, another elevation step. Elevation reverses once it has travelled
/// `elevation_span_deg` in one direction.
#[derive(Debug, Clone)]
pub struct ObservePlan {
    azimuth_sweep_deg: f64,
    elevation_step_deg: f64,
    elevation_span_deg: f64,

    elevation_sign: f64,
    elevation_travel: f64,
    phase: u8,
}

impl Default for ObservePlan {
    fn default() -> Self {
        Self::new(360.0, 10.0, 360.0)
    }
}

impl ObservePlan {
    pub fn new(azimuth_sweep_deg: f64, elevation_step_deg: f64, elevation_span_deg: f64) -> Self {
        Self {
            azimuth_sweep_deg,
            elevation_step_deg,
            elevation_span_deg,
            elevation_sign: 1.0,
            elevation_travel: 0.0,
            phase: 0,
        }
    }
}

impl Iterator for ObservePlan {
    type Item = (MotorAxis, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let elevation_step = self.elevation_step_deg * self.elevation_sign;

        let step = match self.phase {
            0 => (MotorAxis::Azimuth, self.azimuth_sweep_deg),
            2 => (MotorAxis::Azimuth, -self.azimuth_sweep_deg),
            _ => {
                self.elevation_travel += elevation_step;
                (MotorAxis::Elevation, elevation_step)
            }
        };

        if self.phase == 3 && self.elevation_travel.abs() >= self.elevation_span_deg {
            self.elevation_sign = -self.elevation_sign;
            self.elevation_travel = 0.0;
        }
        self.phase = (self.phase + 1) % 4;

        Some(step)
    }
}

pub fn move_request(axis: MotorAxis, degrees: f64, motion: &MotionConfig) -> MoveRequest {
    MoveRequest {
        axis,
        degrees,
        step_delay_us: motion.step_delay_us,
        report_interval: motion.report_interval,
    }
}

/// Runs `moves` in order, stopping after the first one that does not
/// complete. Zero-degree moves are skipped.
pub fn run_moves<R, S, C, I>(
    session: &mut SerialSession<R, S, C>,
    moves: I,
    motion: &MotionConfig,
) -> Result<Vec<SessionReport>, SessionError>
where
    R: BufRead,
    S: LogStore,
    C: Clock,
    I: IntoIterator<Item = (MotorAxis, f64)>,
{
    let mut reports = Vec::new();

    for (axis, degrees) in moves {
        if degrees == 0.0 {
            continue;
        }

        let report = session.execute(&move_request(axis, degrees, motion))?;
        let cancelled = report.outcome.is_cancelled();
        reports.push(report);

        if cancelled {
            break;
        }
    }

    Ok(reports)
}

/// Runs the sweep until a move is cancelled, or until `max_moves` have
/// completed when a limit is given. Returns the number of completed moves.
pub fn run_observe<R, S, C>(
    session: &mut SerialSession<R, S, C>,
    plan: ObservePlan,
    motion: &MotionConfig,
    max_moves: Option<usize>,
) -> Result<usize, SessionError>
where
    R: BufRead,
    S: LogStore,
    C: Clock,
{
    let mut completed = 0;

    for (axis, degrees) in plan {
        if max_moves.is_some_and(|limit| completed >= limit) {
            break;
        }

        let report = session.execute(&move_request(axis, degrees, motion))?;
        if report.outcome.is_cancelled() {
            info!("Observation stopped after {} moves", completed);
            break;
        }
        completed += 1;
    }

    Ok(completed)
}
