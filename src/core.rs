//! Core data types shared by every part of the stage controller.
//!
//! # Overview
//!
//! - [`Axis`] / [`Position`]: the three stage axes and a point in stage space (microns)
//! - [`ConnectionState`]: which backend currently drives the stage
//! - [`Direction`]: sweep direction for auto-step sequences
//! - [`PixelBuffer`]: camera frame data handed to the metric pipeline

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

// =============================================================================
// Axes and Positions
// =============================================================================

/// One of the three stage axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Lateral X.
    X,
    /// Lateral Y.
    Y,
    /// Focus.
    Z,
}

impl Axis {
    /// All axes in X, Y, Z order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

/// Stage position in microns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z (focus) coordinate.
    pub z: f64,
}

impl Position {
    /// Create a position from its three coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Coordinate on `axis`.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Overwrite the coordinate on `axis`.
    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Which backend currently drives the stage.
///
/// Exactly one state is active at a time. `Simulation` is the initial state and
/// the only one in which moves always succeed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Hardware explicitly released; moves are rejected.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Moves and frames go through the hardware adapter.
    Connected,
    /// Positions and metrics are synthesized.
    #[default]
    Simulation,
    /// Hardware failed and degradation to simulation is disabled.
    Error,
}

impl ConnectionState {
    /// Whether `move_stage` can be attempted in this state.
    pub fn accepts_moves(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Simulation)
    }
}

// =============================================================================
// Sweep Direction
// =============================================================================

/// Direction of an auto-step sweep along Z.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Increasing Z.
    Up,
    /// Decreasing Z.
    Down,
}

impl Direction {
    /// +1.0 for `Up`, -1.0 for `Down`.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }
}

// =============================================================================
// Pixel Buffers
// =============================================================================

/// Camera frame data in its native bit depth.
///
/// Camera sensors typically output 8-bit or 16-bit unsigned integers; keeping
/// the native format avoids converting every frame before the metric pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PixelBuffer {
    /// 8-bit unsigned integer pixels (1 byte/pixel)
    U8(Vec<u8>),
    /// 16-bit unsigned integer pixels (2 bytes/pixel)
    U16(Vec<u16>),
    /// 64-bit floating point pixels (8 bytes/pixel)
    F64(Vec<f64>),
}

impl PixelBuffer {
    /// An empty frame, meaning "no data available".
    pub fn empty() -> Self {
        PixelBuffer::U8(Vec::new())
    }

    /// Returns pixel data as f64 slice, using zero-copy for F64 variant.
    pub fn as_f64(&self) -> Cow<'_, [f64]> {
        match self {
            PixelBuffer::U8(data) => Cow::Owned(data.iter().map(|&v| f64::from(v)).collect()),
            PixelBuffer::U16(data) => Cow::Owned(data.iter().map(|&v| f64::from(v)).collect()),
            PixelBuffer::F64(data) => Cow::Borrowed(data.as_slice()),
        }
    }

    /// Returns the number of pixels in the buffer.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(data) => data.len(),
            PixelBuffer::U16(data) => data.len(),
            PixelBuffer::F64(data) => data.len(),
        }
    }

    /// Returns true if the buffer contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
