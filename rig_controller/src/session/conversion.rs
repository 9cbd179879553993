/// Mechanical chain between the motor shaft and the stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GearRatio {
    pub step_angle_deg: f64,
    pub microstep: u32,
    pub gear_teeth: u32,
}

impl Default for GearRatio {
    fn default() -> Self {
        Self {
            step_angle_deg: 1.8,
            microstep: 4,
            gear_teeth: 113,
        }
    }
}

impl GearRatio {
    pub fn pulses_per_degree(&self) -> f64 {
        f64::from(self.microstep) * f64::from(self.gear_teeth) / self.step_angle_deg
    }

    /// Pulses needed to turn the stage by `degrees`, rounded to the nearest
    /// pulse. The sign of `degrees` is carried by the direction, not here.
    /// `None` when the move does not fit in one command.
    pub fn pulses_for(&self, degrees: f64) -> Option<u32> {
        let pulses = (self.pulses_per_degree() * degrees.abs()).round();

        (pulses.is_finite() && pulses <= f64::from(u32::MAX)).then_some(pulses as u32)
    }
}
