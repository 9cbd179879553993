use core::convert::Infallible;

use embedded_hal::{
    delay::DelayNs,
    digital::{OutputPin, PinState},
};
use rig_protocol::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableMode {
    /// needs a high level to power the driver
    ActiveHigh,
    /// needs a low level to power the driver
    ActiveLow,
}

/// Something that can execute single step pulses on one motor.
pub trait PulseDriver {
    fn position(&self) -> i32;
    fn set_direction(&mut self, direction: Direction);
    fn set_step_delay_us(&mut self, step_delay_us: u32);
    fn enable(&mut self);
    fn disable(&mut self);
    fn step(&mut self, delay: &mut impl DelayNs);
}

/// One step/direction driver and the motor state it owns.
///
/// `position` counts executed pulses since power-on and is only ever moved
/// by [`PulseDriver::step`].
pub struct Stepper<DIR, PUL, EN> {
    direction_pin: DIR,
    pulse_pin: PUL,
    enable_pin: EN,

    cw_level: PinState,
    ccw_level: PinState,
    enable_mode: EnableMode,

    step_delay_us: u32,
    position: i32,
    direction: Direction,
    enabled: bool,
}

impl<DIR, PUL, EN> Stepper<DIR, PUL, EN>
where
    DIR: OutputPin<Error = Infallible>,
    PUL: OutputPin<Error = Infallible>,
    EN: OutputPin<Error = Infallible>,
{
    /// Takes the pins already configured as outputs. The pulse line is
    /// driven low and the driver starts disabled.
    pub fn new(
        direction_pin: DIR,
        pulse_pin: PUL,
        enable_pin: EN,
        cw_level: PinState,
        ccw_level: PinState,
        enable_mode: EnableMode,
    ) -> Self {
        let mut stepper = Self {
            direction_pin,
            pulse_pin,
            enable_pin,
            cw_level,
            ccw_level,
            enable_mode,
            step_delay_us: 0,
            position: 0,
            direction: Direction::Forward,
            enabled: true,
        };

        let Ok(()) = stepper.pulse_pin.set_low();
        stepper.disable();

        stepper
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn step_delay_us(&self) -> u32 {
        self.step_delay_us
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn drive_enable(&mut self, powered: bool) {
        let level = match (self.enable_mode, powered) {
            (EnableMode::ActiveHigh, on) => PinState::from(on),
            (EnableMode::ActiveLow, on) => PinState::from(!on),
        };
        let Ok(()) = self.enable_pin.set_state(level);
        self.enabled = powered;
    }

    pub fn release(self) -> (DIR, PUL, EN) {
        (self.direction_pin, self.pulse_pin, self.enable_pin)
    }
}

impl<DIR, PUL, EN> PulseDriver for Stepper<DIR, PUL, EN>
where
    DIR: OutputPin<Error = Infallible>,
    PUL: OutputPin<Error = Infallible>,
    EN: OutputPin<Error = Infallible>,
{
    fn position(&self) -> i32 {
        self.position
    }

    fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    fn set_step_delay_us(&mut self, step_delay_us: u32) {
        self.step_delay_us = step_delay_us;
    }

    fn enable(&mut self) {
        self.drive_enable(true);
    }

    fn disable(&mut self) {
        self.drive_enable(false);
    }

    /// One symmetric pulse: high for `step_delay_us`, then low for the same.
    #[inline(always)]
    fn step(&mut self, delay: &mut impl DelayNs) {
        let level = match self.direction {
            Direction::Forward => {
                self.position = self.position.wrapping_add(1);
                self.cw_level
            }
            Direction::Reverse => {
                self.position = self.position.wrapping_sub(1);
                self.ccw_level
            }
        };
        let Ok(()) = self.direction_pin.set_state(level);

        let Ok(()) = self.pulse_pin.set_high();
        delay.delay_us(self.step_delay_us);
        let Ok(()) = self.pulse_pin.set_low();
        delay.delay_us(self.step_delay_us);
    }
}
