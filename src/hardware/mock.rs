//! Simulated Hardware
//!
//! Provides a deterministic stand-in for the acquisition software so the
//! connected code path can run without physical hardware.
//! All waits use `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! # Behavior
//!
//! - Stage: 1000 µm/s travel speed, positions tracked per axis
//! - Camera: 64x64 16-bit checkerboard whose contrast follows the synthetic
//!   focus curve at the current Z
//!
//! Fault injection switches (`set_fail_connect`, `set_fail_moves`, ...) can be
//! flipped at any time through a shared `Arc`.

use crate::core::{Axis, PixelBuffer, Position};
use crate::hardware::{AdapterInfo, HardwareAdapter};
use crate::metric::SyntheticFocus;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

const FRAME_SIDE: usize = 64;
const FRAME_BASE: f64 = 2000.0;
const FRAME_CONTRAST: f64 = 1500.0;

/// Simulated stage and camera.
///
/// # Example
///
/// ```rust,ignore
/// let adapter = SimulatedAdapter::new();
/// adapter.command_move(Axis::Z, 10.0).await?;
/// assert_eq!(adapter.read_axis(Axis::Z).await?, 10.0);
/// ```
pub struct SimulatedAdapter {
    position: RwLock<Position>,
    speed_um_per_sec: f64,
    focus: SyntheticFocus,
    version_compatible: AtomicBool,
    fail_connect: AtomicBool,
    fail_moves: AtomicBool,
    unconfirmed_reads: AtomicBool,
    blank_frames: AtomicBool,
    connect_calls: AtomicU32,
    move_calls: AtomicU32,
}

impl SimulatedAdapter {
    /// Create a simulated stage at the origin.
    pub fn new() -> Self {
        Self::with_focus(SyntheticFocus::new(100.0, 8.0))
    }

    /// Create a simulated stage whose frames follow `focus`.
    pub fn with_focus(focus: SyntheticFocus) -> Self {
        Self {
            position: RwLock::new(Position::default()),
            speed_um_per_sec: 1000.0,
            focus,
            version_compatible: AtomicBool::new(true),
            fail_connect: AtomicBool::new(false),
            fail_moves: AtomicBool::new(false),
            unconfirmed_reads: AtomicBool::new(false),
            blank_frames: AtomicBool::new(false),
            connect_calls: AtomicU32::new(0),
            move_calls: AtomicU32::new(0),
        }
    }

    /// Start at `position` instead of the origin.
    pub fn at(self, position: Position) -> Self {
        Self {
            position: RwLock::new(position),
            ..self
        }
    }

    /// Report an incompatible software version on connect.
    pub fn set_incompatible(&self, incompatible: bool) {
        self.version_compatible
            .store(!incompatible, Ordering::SeqCst);
    }

    /// Make `connect` fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make `command_move` fail.
    pub fn set_fail_moves(&self, fail: bool) {
        self.fail_moves.store(fail, Ordering::SeqCst);
    }

    /// Make `read_axis` return `NaN`.
    pub fn set_unconfirmed_reads(&self, unconfirmed: bool) {
        self.unconfirmed_reads.store(unconfirmed, Ordering::SeqCst);
    }

    /// Make `pixel_buffer` return empty frames.
    pub fn set_blank_frames(&self, blank: bool) {
        self.blank_frames.store(blank, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far.
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `command_move` calls so far.
    pub fn move_calls(&self) -> u32 {
        self.move_calls.load(Ordering::SeqCst)
    }

    /// Physical position, bypassing the fault switches.
    pub async fn true_position(&self) -> Position {
        *self.position.read().await
    }

    /// Move the physical stage without going through the controller, as if
    /// someone turned a knob.
    pub async fn nudge(&self, axis: Axis, delta: f64) {
        let mut position = self.position.write().await;
        let current = position.get(axis);
        position.set(axis, current + delta);
    }

    fn frame_at(&self, z: f64) -> PixelBuffer {
        let amplitude = FRAME_CONTRAST * self.focus.sharpness(z);
        let pixels = (0..FRAME_SIDE * FRAME_SIDE)
            .map(|i| {
                let (row, col) = (i / FRAME_SIDE, i % FRAME_SIDE);
                let sign = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
                (FRAME_BASE + sign * amplitude).round() as u16
            })
            .collect();
        PixelBuffer::U16(pixels)
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareAdapter for SimulatedAdapter {
    async fn connect(&self) -> Result<AdapterInfo> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            anyhow::bail!("SimulatedAdapter: motor controller not responding");
        }
        if !self.version_compatible.load(Ordering::SeqCst) {
            return Ok(AdapterInfo::incompatible(
                "SimulatedAdapter: firmware 0.9 is older than required 1.0",
            ));
        }
        Ok(AdapterInfo::compatible("SimulatedAdapter: stage and camera ready"))
    }

    async fn read_axis(&self, axis: Axis) -> Result<f64> {
        if self.unconfirmed_reads.load(Ordering::SeqCst) {
            return Ok(f64::NAN);
        }
        Ok(self.position.read().await.get(axis))
    }

    async fn command_move(&self, axis: Axis, delta: f64) -> Result<f64> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_moves.load(Ordering::SeqCst) {
            anyhow::bail!("SimulatedAdapter: axis {} stalled", axis);
        }

        let delay_ms = (delta.abs() / self.speed_um_per_sec * 1000.0) as u64;
        debug!("SimulatedAdapter: moving {} by {:.2} ({}ms)", axis, delta, delay_ms);
        sleep(Duration::from_millis(delay_ms)).await;

        let mut position = self.position.write().await;
        let target = position.get(axis) + delta;
        position.set(axis, target);
        Ok(target)
    }

    async fn pixel_buffer(&self) -> Result<PixelBuffer> {
        if self.blank_frames.load(Ordering::SeqCst) {
            return Ok(PixelBuffer::empty());
        }
        let z = self.position.read().await.z;
        Ok(self.frame_at(z))
    }
}
