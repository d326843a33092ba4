//! Timed Z sweeps.
//!
//! [`AutoStepSequencer`] is the state machine behind an auto-step sweep. It
//! does not own a timer or move the stage itself: the controller calls
//! [`begin_step`](AutoStepSequencer::begin_step) on every tick, performs the
//! move and metric update, hands the reading to
//! [`record`](AutoStepSequencer::record), and closes the tick with
//! [`finish_step`](AutoStepSequencer::finish_step).
//!
//! ```text
//!          start()             step == total
//!   Idle ----------> Running ---------------> Completed
//!    ^                 |                          |
//!    +---- stop() -----+---------- stop() --------+
//! ```
//!
//! `AutoStepComplete` is emitted whenever a running sweep ends, whether it
//! finished, was stopped, or was aborted. Use [`progress`](AutoStepSequencer::progress)
//! to tell those apart.

use crate::core::{Direction, Position};
use crate::error::{AppResult, StageError};
use crate::events::{EventBus, StageEvent};
use crate::metric::MetricSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Sequencer lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    /// No sweep configured or the last one was stopped.
    #[default]
    Idle,
    /// Ticks are being consumed.
    Running,
    /// All steps ran.
    Completed,
}

/// Parameters of one sweep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoStepParams {
    /// Distance per step along Z (microns, positive)
    pub step_size: f64,
    /// Number of steps before the sweep completes
    pub total_steps: u32,
    /// Tick period
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Sweep direction along Z
    pub direction: Direction,
    /// Update the metric after every step and keep the series
    pub record_metrics: bool,
}

impl AutoStepParams {
    /// Parameters in field order.
    pub fn new(
        step_size: f64,
        total_steps: u32,
        delay: Duration,
        direction: Direction,
        record_metrics: bool,
    ) -> Self {
        Self {
            step_size,
            total_steps,
            delay,
            direction,
            record_metrics,
        }
    }

    /// Signed Z delta of one step.
    pub fn step_delta(&self) -> f64 {
        self.step_size * self.direction.sign()
    }

    /// Reject non-positive step sizes, zero steps and a zero delay.
    pub fn validate(&self) -> AppResult<()> {
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(StageError::InvalidSequence(format!(
                "step size must be positive, got {}",
                self.step_size
            )));
        }
        if self.total_steps == 0 {
            return Err(StageError::InvalidSequence(
                "total steps must be at least 1".to_string(),
            ));
        }
        if self.delay.is_zero() {
            return Err(StageError::InvalidSequence(
                "delay must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Progress of the current (or last) sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AutoStepSession {
    /// Parameters the sweep was started with.
    pub params: AutoStepParams,
    /// Steps begun so far.
    pub current_step: u32,
}

/// One recorded point of a sweep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Stage position after the step.
    pub position: Position,
    /// Metric read at that position.
    pub metric: MetricSnapshot,
}

/// Work for one tick, returned by [`AutoStepSequencer::begin_step`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepPlan {
    /// 1-based step number
    pub step: u32,
    /// Signed Z delta to apply
    pub delta: f64,
    /// Whether the metric should be updated and recorded after the move
    pub record: bool,
}

/// Auto-step state machine and collected series.
#[derive(Debug)]
pub struct AutoStepSequencer {
    state: SequencerState,
    session: Option<AutoStepSession>,
    collected: Vec<SeriesPoint>,
    events: EventBus,
}

impl AutoStepSequencer {
    /// Idle sequencer publishing on `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            state: SequencerState::Idle,
            session: None,
            collected: Vec::new(),
            events,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// True while a sweep is running.
    pub fn is_running(&self) -> bool {
        self.state == SequencerState::Running
    }

    /// `(current_step, total_steps)` of the current or last sweep.
    pub fn progress(&self) -> (u32, u32) {
        self.session
            .map(|s| (s.current_step, s.params.total_steps))
            .unwrap_or((0, 0))
    }

    /// Parameters and step count of the current or last sweep.
    pub fn session(&self) -> Option<&AutoStepSession> {
        self.session.as_ref()
    }

    /// Recorded series. Kept after the sweep ends.
    pub fn collected(&self) -> &[SeriesPoint] {
        &self.collected
    }

    /// Tick period while running.
    pub fn period(&self) -> Option<Duration> {
        match (self.state, &self.session) {
            (SequencerState::Running, Some(session)) => Some(session.params.delay),
            _ => None,
        }
    }

    /// Begin a sweep.
    ///
    /// # Errors
    ///
    /// `SequenceRunning` while a sweep is running, or `InvalidSequence` for bad
    /// parameters. Neither changes any state.
    pub fn start(&mut self, params: AutoStepParams) -> AppResult<()> {
        if self.is_running() {
            return Err(StageError::SequenceRunning);
        }
        params.validate()?;

        if params.record_metrics {
            self.collected.clear();
        }
        self.session = Some(AutoStepSession {
            params,
            current_step: 0,
        });
        self.state = SequencerState::Running;
        info!(
            "Auto-step started: {} steps of {:.2} every {:?}",
            params.total_steps,
            params.step_delta(),
            params.delay
        );
        Ok(())
    }

    /// Advance to the next step; `None` unless running.
    pub fn begin_step(&mut self) -> Option<StepPlan> {
        if !self.is_running() {
            return None;
        }
        let session = self.session.as_mut()?;
        session.current_step += 1;
        Some(StepPlan {
            step: session.current_step,
            delta: session.params.step_delta(),
            record: session.params.record_metrics,
        })
    }

    /// Append a reading; true when it is a strict new maximum among this
    /// sweep's readings of the same kind. `NaN` readings are kept in the
    /// series but never count as a maximum.
    pub fn record(&mut self, position: Position, metric: MetricSnapshot) -> bool {
        let previous_max = self
            .collected
            .iter()
            .filter(|p| p.metric.kind == metric.kind && p.metric.is_available())
            .map(|p| p.metric.value)
            .fold(f64::NEG_INFINITY, f64::max);
        self.collected.push(SeriesPoint { position, metric });
        metric.is_available() && metric.value > previous_max
    }

    /// Close the current tick; returns false once the sweep has completed.
    pub fn finish_step(&mut self) -> bool {
        let Some(session) = self.session else {
            return false;
        };
        if !self.is_running() {
            return false;
        }
        if session.current_step >= session.params.total_steps {
            self.state = SequencerState::Completed;
            info!("Auto-step completed after {} steps", session.current_step);
            self.events.emit(StageEvent::AutoStepComplete);
            return false;
        }
        true
    }

    /// End a running sweep early without completing it.
    pub fn abort(&mut self) -> bool {
        self.end_early("aborted")
    }

    /// Stop a running sweep. Returns false when nothing was running; a
    /// completed sweep is reset to `Idle` silently.
    pub fn stop(&mut self) -> bool {
        if self.state == SequencerState::Completed {
            self.state = SequencerState::Idle;
            return false;
        }
        self.end_early("stopped")
    }

    fn end_early(&mut self, how: &str) -> bool {
        if !self.is_running() {
            debug!("Auto-step {} while not running; ignoring", how);
            return false;
        }
        self.state = SequencerState::Idle;
        let (step, total) = self.progress();
        info!("Auto-step {} at step {}/{}", how, step, total);
        self.events.emit(StageEvent::AutoStepComplete);
        true
    }
}
