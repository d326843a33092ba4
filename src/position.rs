//! Stage position and connection state.
//!
//! [`PositionState`] owns the cached X/Y/Z position, the [`ConnectionState`]
//! with its status message, and the hardware adapter handle. Every
//! hardware-facing call goes through here, and every adapter failure is
//! handled by a single policy, [`PositionState::degrade`]: the stage falls
//! back to simulation mode (or enters `Error` when degradation is disabled)
//! and reports the reason through the status message.
//!
//! # Move pipeline
//!
//! ```text
//! validate (tolerance, range, max step) -> adapter.command_move -> settle
//!     -> adapter.read_axis -> adopt reading (or old + delta) -> PositionChanged
//! ```
//!
//! In simulation mode the adapter is bypassed and `old + delta` is committed
//! directly.

use crate::config::{HardwareConfig, Settings, StageConfig};
use crate::core::{Axis, ConnectionState, Position};
use crate::error::{AppResult, StageError};
use crate::error_recovery::{retry_with_policy, RetryPolicy};
use crate::events::{EventBus, StageEvent};
use crate::hardware::HardwareAdapter;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Result of an accepted move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveOutcome {
    /// Axis that moved.
    pub axis: Axis,
    /// Coordinate before the move.
    pub previous: f64,
    /// Coordinate after the move.
    pub position: f64,
    /// True when the new coordinate was read back from hardware.
    pub confirmed: bool,
}

/// Cached stage position plus connection status.
pub struct PositionState {
    adapter: Option<Arc<dyn HardwareAdapter>>,
    position: Position,
    connection: ConnectionState,
    status: String,
    limits: StageConfig,
    hardware: HardwareConfig,
    events: EventBus,
}

impl PositionState {
    /// Create a stage in simulation mode at the origin.
    pub fn new(
        settings: &Settings,
        adapter: Option<Arc<dyn HardwareAdapter>>,
        events: EventBus,
    ) -> Self {
        Self {
            adapter,
            position: Position::default(),
            connection: ConnectionState::Simulation,
            status: "Simulation mode".to_string(),
            limits: settings.stage.clone(),
            hardware: settings.hardware.clone(),
            events,
        }
    }

    /// Cached position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Active connection state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Human-readable status message.
    pub fn status_message(&self) -> &str {
        &self.status
    }

    /// Whether a hardware adapter was supplied.
    pub fn has_adapter(&self) -> bool {
        self.adapter.is_some()
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to the hardware adapter, degrading to simulation on failure.
    ///
    /// An adapter reporting an incompatible version counts as a failure.
    pub async fn connect(&mut self) -> ConnectionState {
        let Some(adapter) = self.adapter.clone() else {
            self.set_status(
                ConnectionState::Simulation,
                "No hardware adapter configured; running in simulation mode",
            );
            return self.connection;
        };

        self.set_status(ConnectionState::Connecting, "Connecting to stage...");
        let policy = RetryPolicy::from(&self.hardware);
        let result = retry_with_policy(&policy, |attempt| {
            let adapter = adapter.clone();
            async move {
                debug!("Connect attempt {}", attempt);
                adapter.connect().await
            }
        })
        .await;

        match result {
            Ok(info) if info.compatible => {
                info!("Stage connected: {}", info.message);
                self.set_status(ConnectionState::Connected, info.message);
                self.sync_from_hardware(adapter.as_ref()).await;
            }
            Ok(info) => {
                self.degrade(StageError::Connection(format!(
                    "incompatible adapter: {}",
                    info.message
                )));
            }
            Err(e) => self.degrade(StageError::Connection(format!("{:#}", e))),
        }
        self.connection
    }

    /// Release the hardware; moves are rejected until reconnect or
    /// [`enter_simulation`](Self::enter_simulation).
    pub fn disconnect(&mut self) {
        self.set_status(ConnectionState::Disconnected, "Disconnected");
    }

    /// Switch to simulation mode, keeping the cached position.
    pub fn enter_simulation(&mut self, message: impl Into<String>) {
        self.set_status(ConnectionState::Simulation, message);
    }

    /// Replace the status message without changing the connection state.
    pub fn report(&mut self, message: impl Into<String>) {
        let state = self.connection;
        self.set_status(state, message);
    }

    /// The one place adapter failures are handled.
    pub fn degrade(&mut self, error: StageError) {
        if self.hardware.degrade_to_simulation {
            warn!("Hardware failure, switching to simulation: {}", error);
            self.set_status(
                ConnectionState::Simulation,
                format!("{}; running in simulation mode", error),
            );
        } else {
            warn!("Hardware failure: {}", error);
            self.set_status(ConnectionState::Error, error.to_string());
        }
    }

    fn set_status(&mut self, state: ConnectionState, message: impl Into<String>) {
        self.connection = state;
        self.status = message.into();
        self.events.emit(StageEvent::StatusChanged);
    }

    async fn sync_from_hardware(&mut self, adapter: &dyn HardwareAdapter) {
        for axis in Axis::ALL {
            match adapter.read_axis(axis).await {
                Ok(value) if value.is_finite() => self.position.set(axis, value),
                Ok(_) => debug!("Axis {} reading unavailable after connect", axis),
                Err(e) => warn!("Axis {} read failed after connect: {:#}", axis, e),
            }
        }
        self.events.emit(StageEvent::PositionChanged);
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Check a relative move without performing it; returns the target.
    pub fn validate_move(&self, axis: Axis, delta: f64) -> AppResult<f64> {
        if !self.connection.accepts_moves() {
            return Err(StageError::NotOperable(self.connection));
        }
        if !delta.is_finite() || delta.abs() < self.limits.tolerance {
            return Err(StageError::ZeroDelta { axis, delta });
        }
        if self.connection == ConnectionState::Connected && delta.abs() > self.limits.max_step {
            return Err(StageError::StepTooLarge {
                axis,
                delta,
                max_step: self.limits.max_step,
            });
        }
        let target = self.position.get(axis) + delta;
        self.check_range(axis, target)?;
        Ok(target)
    }

    fn check_range(&self, axis: Axis, target: f64) -> AppResult<()> {
        if target < self.limits.min_position || target > self.limits.max_position {
            return Err(StageError::OutOfRange {
                axis,
                target,
                min: self.limits.min_position,
                max: self.limits.max_position,
            });
        }
        Ok(())
    }

    /// Move `axis` by `delta` microns.
    ///
    /// # Errors
    ///
    /// Validation failures only (`ZeroDelta`, `StepTooLarge`, `OutOfRange`,
    /// `NotOperable`); the position is unchanged. Hardware failures degrade
    /// to simulation and the move is still committed.
    pub async fn move_stage(&mut self, axis: Axis, delta: f64) -> AppResult<MoveOutcome> {
        self.validate_move(axis, delta)?;
        let outcome = self.apply_move(axis, delta).await;
        self.events.emit(StageEvent::PositionChanged);
        Ok(outcome)
    }

    /// Move several axes as one logical operation.
    ///
    /// Every move is validated before any is performed, and a single
    /// PositionChanged is emitted if at least one axis moved. Deltas below
    /// tolerance are skipped.
    pub async fn move_axes(&mut self, moves: &[(Axis, f64)]) -> AppResult<Vec<MoveOutcome>> {
        let pending: Vec<(Axis, f64)> = moves
            .iter()
            .copied()
            .filter(|(_, delta)| delta.abs() >= self.limits.tolerance)
            .collect();
        for (axis, delta) in &pending {
            self.validate_move(*axis, *delta)?;
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (axis, delta) in pending {
            outcomes.push(self.apply_move(axis, delta).await);
        }
        if !outcomes.is_empty() {
            self.events.emit(StageEvent::PositionChanged);
        }
        Ok(outcomes)
    }

    /// Move `axis` to an absolute `target`; `None` when already within tolerance.
    pub async fn set_position(&mut self, axis: Axis, target: f64) -> AppResult<Option<MoveOutcome>> {
        self.check_range(axis, target)?;
        let delta = target - self.position.get(axis);
        if delta.abs() < self.limits.tolerance {
            return Ok(None);
        }
        self.move_stage(axis, delta).await.map(Some)
    }

    /// Move to an absolute X/Y/Z target with one PositionChanged for the call.
    pub async fn set_xyz_position(&mut self, target: Position) -> AppResult<Vec<MoveOutcome>> {
        let mut moves = Vec::with_capacity(3);
        for axis in Axis::ALL {
            self.check_range(axis, target.get(axis))?;
            moves.push((axis, target.get(axis) - self.position.get(axis)));
        }
        self.move_axes(&moves).await
    }

    async fn apply_move(&mut self, axis: Axis, delta: f64) -> MoveOutcome {
        let previous = self.position.get(axis);
        let fallback = previous + delta;
        let adapter = match self.connection {
            ConnectionState::Connected => self.adapter.clone(),
            _ => None,
        };
        let (position, confirmed) = match adapter {
            Some(adapter) => self.hardware_move(adapter.as_ref(), axis, delta, fallback).await,
            None => (fallback, false),
        };

        self.position.set(axis, position);
        debug!("Axis {} moved {:.3} -> {:.3}", axis, previous, position);
        MoveOutcome {
            axis,
            previous,
            position,
            confirmed,
        }
    }

    async fn hardware_move(
        &mut self,
        adapter: &dyn HardwareAdapter,
        axis: Axis,
        delta: f64,
        fallback: f64,
    ) -> (f64, bool) {
        match adapter.command_move(axis, delta).await {
            Ok(target) => debug!("Axis {} commanded to {:.3}", axis, target),
            Err(e) => {
                self.degrade(StageError::Movement(format!(
                    "move of {:.3} on axis {} failed: {:#}",
                    delta, axis, e
                )));
                return (fallback, false);
            }
        }

        sleep(self.limits.settle).await;

        match adapter.read_axis(axis).await {
            Ok(value) if value.is_finite() => (value, true),
            Ok(_) => {
                debug!("Axis {} read-back unavailable, assuming commanded target", axis);
                (fallback, false)
            }
            Err(e) => {
                warn!("Axis {} read-back failed: {:#}", axis, e);
                (fallback, false)
            }
        }
    }

    /// Poll the adapter for external position changes.
    ///
    /// Only runs when connected and no sequence is running. Returns true when
    /// any axis changed; one PositionChanged is emitted in that case.
    pub async fn refresh_position(&mut self, sequence_running: bool) -> bool {
        if self.connection != ConnectionState::Connected || sequence_running {
            return false;
        }
        let Some(adapter) = self.adapter.clone() else {
            return false;
        };

        let mut changed = false;
        for axis in Axis::ALL {
            match adapter.read_axis(axis).await {
                Ok(value) if value.is_finite() && value != self.position.get(axis) => {
                    self.position.set(axis, value);
                    changed = true;
                }
                Ok(_) => {}
                Err(e) => {
                    self.degrade(StageError::Connection(format!(
                        "position poll on axis {} failed: {:#}",
                        axis, e
                    )));
                    break;
                }
            }
        }

        if changed {
            self.events.emit(StageEvent::PositionChanged);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedAdapter;
    use tokio::sync::broadcast::Receiver;

    fn drain(rx: &mut Receiver<StageEvent>) -> Vec<StageEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn simulated() -> (PositionState, Receiver<StageEvent>) {
        let events = EventBus::new(64);
        let rx = events.subscribe();
        (PositionState::new(&Settings::default(), None, events), rx)
    }

    fn with_adapter(
        settings: &Settings,
    ) -> (PositionState, Arc<SimulatedAdapter>, Receiver<StageEvent>) {
        let adapter = Arc::new(SimulatedAdapter::new());
        let events = EventBus::new(64);
        let rx = events.subscribe();
        let state = PositionState::new(settings, Some(adapter.clone()), events);
        (state, adapter, rx)
    }

    #[tokio::test]
    async fn test_zero_delta_rejected_in_simulation() {
        let (mut state, mut rx) = simulated();
        let err = state.move_stage(Axis::Z, 0.0).await.unwrap_err();
        assert!(matches!(err, StageError::ZeroDelta { .. }));
        assert_eq!(state.position(), Position::default());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_simulation_move_commits_delta() {
        let (mut state, mut rx) = simulated();
        let outcome = state.move_stage(Axis::X, 12.5).await.unwrap();
        assert_eq!(outcome.position, 12.5);
        assert!(!outcome.confirmed);
        assert_eq!(drain(&mut rx), vec![StageEvent::PositionChanged]);
    }

    #[tokio::test]
    async fn test_range_enforced() {
        let (mut state, _rx) = simulated();
        let err = state.move_stage(Axis::Y, 30_000.0).await.unwrap_err();
        assert!(matches!(err, StageError::OutOfRange { .. }));
        assert!(state.set_position(Axis::Y, -30_000.0).await.is_err());
        assert_eq!(state.position().y, 0.0);
    }

    #[tokio::test]
    async fn test_set_xyz_coalesces_notifications() {
        let (mut state, mut rx) = simulated();
        let outcomes = state
            .set_xyz_position(Position::new(1.0, 0.005, 3.0))
            .await
            .unwrap();
        // Y delta is below tolerance and skipped
        assert_eq!(outcomes.len(), 2);
        assert_eq!(state.position(), Position::new(1.0, 0.0, 3.0));
        assert_eq!(drain(&mut rx), vec![StageEvent::PositionChanged]);

        let none = state.set_xyz_position(Position::new(1.0, 0.0, 3.0)).await.unwrap();
        assert!(none.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_set_xyz_validates_before_moving() {
        let (mut state, _rx) = simulated();
        let result = state
            .set_xyz_position(Position::new(5.0, 5.0, 99_999.0))
            .await;
        assert!(result.is_err());
        assert_eq!(state.position(), Position::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_move_reads_back() {
        let (mut state, adapter, _rx) = with_adapter(&Settings::default());
        assert_eq!(state.connect().await, ConnectionState::Connected);

        let outcome = state.move_stage(Axis::Z, 4.0).await.unwrap();
        assert!(outcome.confirmed);
        assert_eq!(outcome.position, 4.0);
        assert_eq!(adapter.move_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_move_rejects_oversized_step() {
        let (mut state, adapter, _rx) = with_adapter(&Settings::default());
        state.connect().await;
        let err = state.move_stage(Axis::Z, 600.0).await.unwrap_err();
        assert!(matches!(err, StageError::StepTooLarge { .. }));
        assert_eq!(adapter.move_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_read_falls_back_to_delta() {
        let (mut state, adapter, mut rx) = with_adapter(&Settings::default());
        state.connect().await;
        drain(&mut rx);
        adapter.set_unconfirmed_reads(true);

        let outcome = state.move_stage(Axis::X, 2.0).await.unwrap();
        assert!(!outcome.confirmed);
        assert_eq!(outcome.position, 2.0);
        assert_eq!(drain(&mut rx), vec![StageEvent::PositionChanged]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_move_degrades_to_simulation() {
        let (mut state, adapter, mut rx) = with_adapter(&Settings::default());
        state.connect().await;
        drain(&mut rx);
        adapter.set_fail_moves(true);

        let outcome = state.move_stage(Axis::X, 2.0).await.unwrap();
        assert_eq!(outcome.position, 2.0);
        assert_eq!(state.connection(), ConnectionState::Simulation);
        assert!(state.status_message().contains("stalled"));
        assert_eq!(
            drain(&mut rx),
            vec![StageEvent::StatusChanged, StageEvent::PositionChanged]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_retries_then_degrades() {
        let (mut state, adapter, _rx) = with_adapter(&Settings::default());
        adapter.set_fail_connect(true);
        assert_eq!(state.connect().await, ConnectionState::Simulation);
        assert_eq!(adapter.connect_calls(), 3);
        assert!(state.status_message().contains("not responding"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incompatible_adapter_is_not_success() {
        let (mut state, adapter, _rx) = with_adapter(&Settings::default());
        adapter.set_incompatible(true);
        assert_eq!(state.connect().await, ConnectionState::Simulation);
        assert!(state.status_message().contains("incompatible"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_state_when_degradation_disabled() {
        let mut settings = Settings::default();
        settings.hardware.degrade_to_simulation = false;
        settings.hardware.connect_attempts = 1;
        let (mut state, adapter, _rx) = with_adapter(&settings);
        adapter.set_fail_connect(true);

        assert_eq!(state.connect().await, ConnectionState::Error);
        let err = state.move_stage(Axis::X, 1.0).await.unwrap_err();
        assert!(matches!(err, StageError::NotOperable(ConnectionState::Error)));
    }

    #[tokio::test]
    async fn test_disconnected_rejects_moves() {
        let (mut state, _rx) = simulated();
        state.disconnect();
        assert!(state.move_stage(Axis::X, 1.0).await.is_err());
        state.enter_simulation("back to simulation");
        assert!(state.move_stage(Axis::X, 1.0).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_only_reports_changes() {
        let (mut state, adapter, mut rx) = with_adapter(&Settings::default());
        state.connect().await;
        drain(&mut rx);

        assert!(!state.refresh_position(false).await);
        adapter.nudge(Axis::Y, 3.0).await;
        assert!(!state.refresh_position(true).await);
        assert!(state.refresh_position(false).await);
        assert_eq!(state.position().y, 3.0);
        assert_eq!(drain(&mut rx), vec![StageEvent::PositionChanged]);
    }
}
