//! MJC3 USB joystick reports.
//!
//! The MJC3 is a three-axis HID joystick with a speed knob. Each input report
//! is five bytes:
//!
//! | byte | field  | type |
//! |------|--------|------|
//! | 0    | x      | i8   |
//! | 1    | y      | i8   |
//! | 2    | z      | i8   |
//! | 3    | button | u8   |
//! | 4    | speed  | u8   |
//!
//! [`JogMapping`] turns a report into relative stage moves. Reading the HID
//! device is left to the caller; this module only decodes bytes.

use crate::config::JoystickConfig;
use crate::core::Axis;
use crate::error::{AppResult, StageError};
use serde::{Deserialize, Serialize};

/// USB vendor id of the MJC3.
pub const MJC3_VENDOR_ID: u16 = 0x1313;
/// USB product id of the MJC3.
pub const MJC3_PRODUCT_ID: u16 = 0x9000;
/// Input report length in bytes.
pub const MJC3_REPORT_LEN: usize = 5;

const FULL_DEFLECTION: f64 = 127.0;
const FULL_SPEED: f64 = 255.0;

/// One decoded joystick input report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoystickReport {
    /// X deflection, -128..=127.
    pub x: i8,
    /// Y deflection, -128..=127.
    pub y: i8,
    /// Z (focus) deflection, -128..=127.
    pub z: i8,
    /// Button pressed.
    pub button: bool,
    /// Speed knob, 0..=255.
    pub speed: u8,
}

impl JoystickReport {
    /// Decode a raw report.
    ///
    /// # Errors
    ///
    /// `InvalidReport` unless `bytes` is exactly [`MJC3_REPORT_LEN`] long.
    pub fn parse(bytes: &[u8]) -> AppResult<Self> {
        let [x, y, z, button, speed]: [u8; MJC3_REPORT_LEN] = bytes.try_into().map_err(|_| {
            StageError::InvalidReport(format!(
                "expected {} bytes, got {}",
                MJC3_REPORT_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self {
            x: x as i8,
            y: y as i8,
            z: z as i8,
            button: button != 0,
            speed,
        })
    }

    /// Deflection of `axis`.
    pub fn axis(&self, axis: Axis) -> i8 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

/// Maps joystick deflection to relative moves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JogMapping {
    /// Deflections with magnitude up to this are ignored.
    pub deadzone: u8,
    /// Move at full deflection with the speed knob fully open (microns)
    pub max_step: f64,
}

impl JogMapping {
    /// Mapping with an explicit deadzone and full-scale step.
    pub fn new(deadzone: u8, max_step: f64) -> Self {
        Self { deadzone, max_step }
    }

    /// Mapping from the `[joystick]` settings.
    pub fn from_config(config: &JoystickConfig) -> Self {
        Self::new(config.deadzone, config.max_step)
    }

    /// Delta for a single deflection; zero inside the deadzone.
    pub fn delta(&self, value: i8, speed: u8) -> f64 {
        // -128 would overshoot full deflection
        let value = value.max(-127);
        if value.unsigned_abs() <= self.deadzone {
            return 0.0;
        }
        f64::from(value) / FULL_DEFLECTION * self.max_step * f64::from(speed) / FULL_SPEED
    }

    /// Non-zero deltas for every deflected axis.
    pub fn deltas(&self, report: &JoystickReport) -> Vec<(Axis, f64)> {
        Axis::ALL
            .into_iter()
            .map(|axis| (axis, self.delta(report.axis(axis), report.speed)))
            .filter(|(_, delta)| *delta != 0.0)
            .collect()
    }
}

impl Default for JogMapping {
    fn default() -> Self {
        Self::from_config(&JoystickConfig::default())
    }
}
