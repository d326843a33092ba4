//! Message types for actor-based communication
//!
//! This module defines the commands sent from a [`crate::app_actor::ControllerHandle`]
//! to the [`crate::app_actor::ControllerActor`]. Every command carries a oneshot
//! sender for its response, so callers await results without sharing the
//! controller behind a lock.

use crate::bookmarks::Bookmark;
use crate::controller::ControllerSnapshot;
use crate::core::{Axis, ConnectionState, Position};
use crate::error::AppResult;
use crate::events::StageEvent;
use crate::joystick::JoystickReport;
use crate::metric::{MetricKind, MetricSnapshot};
use crate::position::MoveOutcome;
use crate::sequencer::AutoStepParams;
use tokio::sync::{broadcast, oneshot};

/// Commands that can be sent to the ControllerActor
#[derive(Debug)]
pub enum ControllerCommand {
    /// Connect to the hardware adapter
    Connect {
        /// Reply channel.
        response: oneshot::Sender<AppResult<ConnectionState>>,
    },

    /// Release the hardware
    Disconnect {
        /// Reply channel.
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Switch to simulation mode
    EnterSimulation {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },

    /// Relative move on one axis
    MoveStage {
        /// Axis to move.
        axis: Axis,
        /// Relative move in microns.
        delta: f64,
        /// Reply channel.
        response: oneshot::Sender<AppResult<MoveOutcome>>,
    },

    /// Absolute move on one axis
    SetPosition {
        /// Axis to move.
        axis: Axis,
        /// Absolute target in microns.
        target: f64,
        /// Reply channel.
        response: oneshot::Sender<AppResult<Option<MoveOutcome>>>,
    },

    /// Absolute move on all axes
    SetXyzPosition {
        /// Absolute target in microns.
        target: Position,
        /// Reply channel.
        response: oneshot::Sender<AppResult<Vec<MoveOutcome>>>,
    },

    /// Move to a saved bookmark (1-based)
    GotoBookmark {
        /// 1-based bookmark index.
        index: usize,
        /// Reply channel.
        response: oneshot::Sender<AppResult<Vec<MoveOutcome>>>,
    },

    /// Apply a joystick report
    Jog {
        /// Decoded joystick report.
        report: JoystickReport,
        /// Reply channel.
        response: oneshot::Sender<AppResult<Vec<MoveOutcome>>>,
    },

    /// Refresh metrics now
    UpdateMetric {
        /// Reply channel.
        response: oneshot::Sender<MetricSnapshot>,
    },

    /// Select the active metric
    SetMetricKind {
        /// Metric to select.
        kind: MetricKind,
        /// Reply channel.
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Select the active metric by display name
    SetMetricKindByName {
        /// Metric display name.
        name: String,
        /// Reply channel.
        response: oneshot::Sender<AppResult<MetricKind>>,
    },

    /// Bookmark the current position
    AddBookmark {
        /// Bookmark label.
        label: String,
        /// Reply channel.
        response: oneshot::Sender<AppResult<Bookmark>>,
    },

    /// Remove a bookmark (1-based)
    RemoveBookmark {
        /// 1-based bookmark index.
        index: usize,
        /// Reply channel.
        response: oneshot::Sender<AppResult<Bookmark>>,
    },

    /// Start an auto-step sweep
    StartSequence {
        /// Sweep parameters.
        params: AutoStepParams,
        /// Reply channel.
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Stop the running sweep
    StopSequence {
        /// Reply channel.
        response: oneshot::Sender<bool>,
    },

    /// Copy of the current state
    Snapshot {
        /// Reply channel.
        response: oneshot::Sender<ControllerSnapshot>,
    },

    /// Subscribe to change notifications
    Subscribe {
        /// Reply channel.
        response: oneshot::Sender<broadcast::Receiver<StageEvent>>,
    },

    /// Shutdown the actor
    Shutdown {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },
}

impl ControllerCommand {
    /// Helper to create a Connect command
    pub fn connect() -> (Self, oneshot::Receiver<AppResult<ConnectionState>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Connect { response: tx }, rx)
    }

    /// Helper to create a Disconnect command
    pub fn disconnect() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Disconnect { response: tx }, rx)
    }

    /// Helper to create an EnterSimulation command
    pub fn enter_simulation() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::EnterSimulation { response: tx }, rx)
    }

    /// Helper to create a MoveStage command
    pub fn move_stage(axis: Axis, delta: f64) -> (Self, oneshot::Receiver<AppResult<MoveOutcome>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::MoveStage {
                axis,
                delta,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a SetPosition command
    pub fn set_position(
        axis: Axis,
        target: f64,
    ) -> (Self, oneshot::Receiver<AppResult<Option<MoveOutcome>>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetPosition {
                axis,
                target,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a SetXyzPosition command
    pub fn set_xyz_position(target: Position) -> (Self, oneshot::Receiver<AppResult<Vec<MoveOutcome>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetXyzPosition { target, response: tx }, rx)
    }

    /// Helper to create a GotoBookmark command
    pub fn goto_bookmark(index: usize) -> (Self, oneshot::Receiver<AppResult<Vec<MoveOutcome>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GotoBookmark { index, response: tx }, rx)
    }

    /// Helper to create a Jog command
    pub fn jog(report: JoystickReport) -> (Self, oneshot::Receiver<AppResult<Vec<MoveOutcome>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Jog { report, response: tx }, rx)
    }

    /// Helper to create an UpdateMetric command
    pub fn update_metric() -> (Self, oneshot::Receiver<MetricSnapshot>) {
        let (tx, rx) = oneshot::channel();
        (Self::UpdateMetric { response: tx }, rx)
    }

    /// Helper to create a SetMetricKind command
    pub fn set_metric_kind(kind: MetricKind) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetMetricKind { kind, response: tx }, rx)
    }

    /// Helper to create a SetMetricKindByName command
    pub fn set_metric_kind_by_name(name: String) -> (Self, oneshot::Receiver<AppResult<MetricKind>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetMetricKindByName { name, response: tx }, rx)
    }

    /// Helper to create an AddBookmark command
    pub fn add_bookmark(label: String) -> (Self, oneshot::Receiver<AppResult<Bookmark>>) {
        let (tx, rx) = oneshot::channel();
        (Self::AddBookmark { label, response: tx }, rx)
    }

    /// Helper to create a RemoveBookmark command
    pub fn remove_bookmark(index: usize) -> (Self, oneshot::Receiver<AppResult<Bookmark>>) {
        let (tx, rx) = oneshot::channel();
        (Self::RemoveBookmark { index, response: tx }, rx)
    }

    /// Helper to create a StartSequence command
    pub fn start_sequence(params: AutoStepParams) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::StartSequence { params, response: tx }, rx)
    }

    /// Helper to create a StopSequence command
    pub fn stop_sequence() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self::StopSequence { response: tx }, rx)
    }

    /// Helper to create a Snapshot command
    pub fn snapshot() -> (Self, oneshot::Receiver<ControllerSnapshot>) {
        let (tx, rx) = oneshot::channel();
        (Self::Snapshot { response: tx }, rx)
    }

    /// Helper to create a Subscribe command
    pub fn subscribe() -> (Self, oneshot::Receiver<broadcast::Receiver<StageEvent>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Subscribe { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
