//! Actor-based controller task
//!
//! [`ControllerActor`] owns the [`Controller`] inside a single tokio task. The
//! task multiplexes four sources with `select!`:
//!
//! - commands from [`ControllerHandle`]s
//! - the position-refresh timer
//! - the metric-refresh timer
//! - the auto-step timer, armed only while a sweep is running
//!
//! Each handler runs to completion before the next source is polled, so a
//! sweep step (move, settle, read back, metric, max bookmark) can never
//! interleave with a manual command or another step.

use crate::bookmarks::Bookmark;
use crate::controller::{Controller, ControllerSnapshot};
use crate::core::{Axis, ConnectionState, Position};
use crate::error::{AppResult, StageError};
use crate::events::StageEvent;
use crate::joystick::JoystickReport;
use crate::messages::ControllerCommand;
use crate::metric::{MetricKind, MetricSnapshot};
use crate::position::MoveOutcome;
use crate::sequencer::AutoStepParams;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Which source woke the actor.
enum Wakeup {
    Command(Option<ControllerCommand>),
    RefreshPosition,
    RefreshMetric,
    Step,
}

/// Actor that owns all controller state
pub struct ControllerActor {
    controller: Controller,
    step_timer: Option<Interval>,
}

impl ControllerActor {
    /// Creates a new ControllerActor
    pub fn new(controller: Controller) -> Self {
        Self {
            controller,
            step_timer: None,
        }
    }

    /// Runs the actor event loop until shutdown or until every handle is dropped
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<ControllerCommand>) {
        info!("ControllerActor started");

        let timing = self.controller.settings().timing.clone();
        let mut position_timer = periodic(timing.position_refresh);
        let mut metric_timer = periodic(timing.metric_refresh);

        loop {
            let wakeup = tokio::select! {
                command = command_rx.recv() => Wakeup::Command(command),
                _ = position_timer.tick() => Wakeup::RefreshPosition,
                _ = metric_timer.tick() => Wakeup::RefreshMetric,
                _ = next_step(&mut self.step_timer) => Wakeup::Step,
            };

            match wakeup {
                Wakeup::Command(None) => {
                    debug!("All controller handles dropped");
                    break;
                }
                Wakeup::Command(Some(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Wakeup::RefreshPosition => {
                    self.controller.refresh_position().await;
                }
                Wakeup::RefreshMetric => {
                    self.controller.update_metric().await;
                }
                Wakeup::Step => {
                    self.controller.sequence_tick().await;
                }
            }

            if !self.controller.sequencer().is_running() {
                self.step_timer = None;
            }
        }

        info!("ControllerActor shutting down");
    }

    /// Handles one command; returns false on shutdown.
    async fn handle_command(&mut self, command: ControllerCommand) -> bool {
        match command {
            ControllerCommand::Connect { response } => {
                let result = self.controller.connect().await;
                let _ = response.send(result);
            }

            ControllerCommand::Disconnect { response } => {
                let _ = response.send(self.controller.disconnect());
            }

            ControllerCommand::EnterSimulation { response } => {
                self.controller.enter_simulation();
                let _ = response.send(());
            }

            ControllerCommand::MoveStage {
                axis,
                delta,
                response,
            } => {
                let result = self.controller.move_stage(axis, delta).await;
                let _ = response.send(result);
            }

            ControllerCommand::SetPosition {
                axis,
                target,
                response,
            } => {
                let result = self.controller.set_position(axis, target).await;
                let _ = response.send(result);
            }

            ControllerCommand::SetXyzPosition { target, response } => {
                let result = self.controller.set_xyz_position(target).await;
                let _ = response.send(result);
            }

            ControllerCommand::GotoBookmark { index, response } => {
                let result = self.controller.goto_bookmark(index).await;
                let _ = response.send(result);
            }

            ControllerCommand::Jog { report, response } => {
                let result = self.controller.jog(&report).await;
                let _ = response.send(result);
            }

            ControllerCommand::UpdateMetric { response } => {
                let snapshot = self.controller.update_metric().await;
                let _ = response.send(snapshot);
            }

            ControllerCommand::SetMetricKind { kind, response } => {
                let _ = response.send(self.controller.set_metric_kind(kind));
            }

            ControllerCommand::SetMetricKindByName { name, response } => {
                let _ = response.send(self.controller.set_metric_kind_by_name(&name));
            }

            ControllerCommand::AddBookmark { label, response } => {
                let _ = response.send(self.controller.add_bookmark(&label));
            }

            ControllerCommand::RemoveBookmark { index, response } => {
                let _ = response.send(self.controller.remove_bookmark(index));
            }

            ControllerCommand::StartSequence { params, response } => {
                let result = self.controller.start_sequence(params);
                if result.is_ok() {
                    self.step_timer = Some(periodic(params.delay));
                }
                let _ = response.send(result);
            }

            ControllerCommand::StopSequence { response } => {
                let _ = response.send(self.controller.stop_sequence());
            }

            ControllerCommand::Snapshot { response } => {
                let _ = response.send(self.controller.snapshot());
            }

            ControllerCommand::Subscribe { response } => {
                let _ = response.send(self.controller.subscribe());
            }

            ControllerCommand::Shutdown { response } => {
                info!("Shutdown command received");
                self.controller.stop_sequence();
                let _ = response.send(());
                return false;
            }
        }
        true
    }
}

/// Interval whose first tick is one full period from now. Late ticks are
/// pushed back rather than fired in a burst.
fn periodic(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_step(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Cloneable front end to a running [`ControllerActor`].
///
/// Every method fails with [`StageError::ActorUnavailable`] once the actor has
/// shut down.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    sender: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    /// Handle sending on `sender`; see [`spawn`].
    pub fn new(sender: mpsc::Sender<ControllerCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        (command, response): (ControllerCommand, oneshot::Receiver<T>),
    ) -> AppResult<T> {
        self.sender
            .send(command)
            .await
            .map_err(|_| StageError::ActorUnavailable)?;
        response.await.map_err(|_| StageError::ActorUnavailable)
    }

    /// Connect to the hardware adapter.
    pub async fn connect(&self) -> AppResult<ConnectionState> {
        self.request(ControllerCommand::connect()).await?
    }

    /// Drop the hardware connection.
    pub async fn disconnect(&self) -> AppResult<()> {
        self.request(ControllerCommand::disconnect()).await?
    }

    /// Switch to simulation mode.
    pub async fn enter_simulation(&self) -> AppResult<()> {
        self.request(ControllerCommand::enter_simulation()).await
    }

    /// Relative move on one axis.
    pub async fn move_stage(&self, axis: Axis, delta: f64) -> AppResult<MoveOutcome> {
        self.request(ControllerCommand::move_stage(axis, delta)).await?
    }

    /// Absolute move on one axis.
    pub async fn set_position(&self, axis: Axis, target: f64) -> AppResult<Option<MoveOutcome>> {
        self.request(ControllerCommand::set_position(axis, target))
            .await?
    }

    /// Absolute move on all axes.
    pub async fn set_xyz_position(&self, target: Position) -> AppResult<Vec<MoveOutcome>> {
        self.request(ControllerCommand::set_xyz_position(target))
            .await?
    }

    /// Move to the bookmark at 1-based `index`.
    pub async fn goto_bookmark(&self, index: usize) -> AppResult<Vec<MoveOutcome>> {
        self.request(ControllerCommand::goto_bookmark(index)).await?
    }

    /// Apply one joystick report.
    pub async fn jog(&self, report: JoystickReport) -> AppResult<Vec<MoveOutcome>> {
        self.request(ControllerCommand::jog(report)).await?
    }

    /// Recompute metrics now.
    pub async fn update_metric(&self) -> AppResult<MetricSnapshot> {
        self.request(ControllerCommand::update_metric()).await
    }

    /// Select a metric.
    pub async fn set_metric_kind(&self, kind: MetricKind) -> AppResult<()> {
        self.request(ControllerCommand::set_metric_kind(kind)).await?
    }

    /// Select a metric by name.
    pub async fn set_metric_kind_by_name(&self, name: &str) -> AppResult<MetricKind> {
        self.request(ControllerCommand::set_metric_kind_by_name(name.to_string()))
            .await?
    }

    /// Bookmark the current position.
    pub async fn add_bookmark(&self, label: &str) -> AppResult<Bookmark> {
        self.request(ControllerCommand::add_bookmark(label.to_string()))
            .await?
    }

    /// Remove the bookmark at 1-based `index`.
    pub async fn remove_bookmark(&self, index: usize) -> AppResult<Bookmark> {
        self.request(ControllerCommand::remove_bookmark(index)).await?
    }

    /// Start a sweep; the actor arms its step timer.
    pub async fn start_sequence(&self, params: AutoStepParams) -> AppResult<()> {
        self.request(ControllerCommand::start_sequence(params)).await?
    }

    /// Stop the running sweep, if any.
    pub async fn stop_sequence(&self) -> AppResult<bool> {
        self.request(ControllerCommand::stop_sequence()).await
    }

    /// Copy of the controller state.
    pub async fn snapshot(&self) -> AppResult<ControllerSnapshot> {
        self.request(ControllerCommand::snapshot()).await
    }

    /// Receiver for change notifications.
    pub async fn subscribe(&self) -> AppResult<broadcast::Receiver<StageEvent>> {
        self.request(ControllerCommand::subscribe()).await
    }

    /// Stop the actor after replying.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(ControllerCommand::shutdown()).await
    }
}

/// Spawn `controller` on its own task.
pub fn spawn(controller: Controller) -> (ControllerHandle, JoinHandle<()>) {
    let capacity = controller
        .settings()
        .application
        .command_channel_capacity
        .max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(ControllerActor::new(controller).run(rx));
    (ControllerHandle::new(tx), task)
}
