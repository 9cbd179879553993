//! Device side of the rig: step pulse generation for the elevation and
//! azimuth motors, driven by line commands read from the serial link.
//!
//! Pins and delays come from `embedded-hal`, the serial link from a
//! [`DeviceLink`] implementation supplied by the board support code. Nothing
//! here allocates: lines live in fixed buffers on the stack.

#![cfg_attr(not(test), no_std)]

pub mod firmware;
pub mod link;
pub mod motion;
pub mod stepper;

pub use firmware::{Firmware, LineOutcome};
pub use link::{DeviceLink, LINE_CAPACITY};
pub use motion::{Axes, MotionLoop, MotionOutcome, MotionState};
pub use stepper::{EnableMode, PulseDriver, Stepper};
