//! Hardware adapter contract.
//!
//! The controller talks to the acquisition software through a single
//! [`HardwareAdapter`] trait object. Real implementations live outside this
//! crate; [`mock::SimulatedAdapter`] provides a deterministic stand-in.
//!
//! # Contract
//!
//! - All methods are async and take `&self`; implementations use interior
//!   mutability for their own state.
//! - Errors are reported as `anyhow::Result`. The controller never lets them
//!   escape: a failed `connect` or `command_move` degrades the stage to
//!   simulation mode.
//! - `read_axis` may return `NaN` when the device cannot confirm a reading.
//! - `pixel_buffer` may return an empty buffer when no frame is available.

pub mod mock;

use crate::core::{Axis, PixelBuffer};
use anyhow::Result;
use async_trait::async_trait;

/// Result of a successful `connect` handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Human-readable description of the connected device.
    pub message: String,
    /// Whether the adapter reported a compatible software version.
    ///
    /// An incompatible adapter is treated as a connection failure.
    pub compatible: bool,
}

impl AdapterInfo {
    /// A compatible adapter with the given description.
    pub fn compatible(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            compatible: true,
        }
    }

    /// An adapter whose version check failed.
    pub fn incompatible(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            compatible: false,
        }
    }
}

/// Capability: stage motion plus frame acquisition.
#[async_trait]
pub trait HardwareAdapter: Send + Sync {
    /// Open the connection to the acquisition software.
    async fn connect(&self) -> Result<AdapterInfo>;

    /// Read the current coordinate of `axis` in microns (`NaN` if unknown).
    async fn read_axis(&self, axis: Axis) -> Result<f64>;

    /// Command a relative move of `delta` microns on `axis`.
    ///
    /// Returns the device-reported target position.
    async fn command_move(&self, axis: Axis, delta: f64) -> Result<f64>;

    /// Fetch the most recent camera frame (empty when none is available).
    async fn pixel_buffer(&self) -> Result<PixelBuffer>;
}
