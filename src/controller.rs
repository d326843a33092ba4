//! The stage controller aggregate.
//!
//! [`Controller`] owns every piece of mutable state: position and connection
//! ([`PositionState`]), metrics ([`MetricEngine`]), bookmarks
//! ([`BookmarkStore`]) and the auto-step state machine
//! ([`AutoStepSequencer`]). All mutation goes through `&mut self`, so one
//! owner (normally [`crate::app_actor::ControllerActor`]) serializes every
//! operation and no handler can observe another's partial state.
//!
//! Manual moves, connect, disconnect and joystick jogs are refused with
//! [`StageError::SequenceRunning`] while a sweep is running.

use crate::bookmarks::{validate_label, Bookmark, BookmarkStore};
use crate::config::Settings;
use crate::core::{Axis, ConnectionState, Position};
use crate::error::{AppResult, StageError};
use crate::events::{EventBus, StageEvent};
use crate::hardware::HardwareAdapter;
use crate::joystick::{JogMapping, JoystickReport};
use crate::metadata::{BookmarkRecord, JsonLinesMetadata, MetadataSink};
use crate::metric::{MetricEngine, MetricKind, MetricSnapshot};
use crate::position::{MoveOutcome, PositionState};
use crate::sequencer::{AutoStepParams, AutoStepSequencer, SeriesPoint, SequencerState};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Point-in-time copy of the controller state for presentation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    /// Cached stage position.
    pub position: Position,
    /// Connection state.
    pub connection: ConnectionState,
    /// Latest status message.
    pub status: String,
    /// Selected metric reading.
    pub metric: MetricSnapshot,
    /// Sweep state.
    pub sequencer: SequencerState,
    /// `(current_step, total_steps)`
    pub progress: (u32, u32),
    /// Bookmarks in order.
    pub bookmarks: Vec<Bookmark>,
}

/// Owner of all stage state.
pub struct Controller {
    settings: Settings,
    events: EventBus,
    position: PositionState,
    metrics: MetricEngine,
    bookmarks: BookmarkStore,
    sequencer: AutoStepSequencer,
    jog: JogMapping,
    metadata: Option<Box<dyn MetadataSink>>,
}

impl Controller {
    /// Create a controller in simulation mode. Call [`connect`](Self::connect)
    /// to bring up `adapter`.
    pub fn new(settings: Settings, adapter: Option<Arc<dyn HardwareAdapter>>) -> Self {
        let events = EventBus::new(settings.application.event_channel_capacity);
        let position = PositionState::new(&settings, adapter.clone(), events.clone());
        let metrics = MetricEngine::new(
            &settings.metric,
            &settings.simulation,
            adapter,
            events.clone(),
        );
        let sequencer = AutoStepSequencer::new(events.clone());
        let jog = JogMapping::from_config(&settings.joystick);

        Self {
            settings,
            events,
            position,
            metrics,
            bookmarks: BookmarkStore::new(),
            sequencer,
            jog,
            metadata: None,
        }
    }

    /// Controller with no hardware adapter.
    pub fn simulated(settings: Settings) -> Self {
        Self::new(settings, None)
    }

    /// Create a controller and, when `application.metadata_path` is set,
    /// restore bookmarks from that file and keep appending to it.
    pub fn from_settings(
        settings: Settings,
        adapter: Option<Arc<dyn HardwareAdapter>>,
    ) -> AppResult<Self> {
        let metadata_path = settings.application.metadata_path.clone();
        let mut controller = Self::new(settings, adapter);
        if let Some(path) = metadata_path {
            let sink = JsonLinesMetadata::new(path);
            let records = sink.load()?;
            let applied = controller.restore_bookmarks(records);
            info!(
                "Restored {} bookmark records from {}",
                applied,
                sink.path().display()
            );
            controller = controller.with_metadata(sink);
        }
        Ok(controller)
    }

    /// Attach a sink that receives every bookmark mutation.
    pub fn with_metadata(mut self, sink: impl MetadataSink + 'static) -> Self {
        self.metadata = Some(Box::new(sink));
        self
    }

    // =========================================================================
    // State access
    // =========================================================================

    /// Settings the controller was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Event bus shared by all components.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// New receiver for change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }

    /// Cached stage position.
    pub fn position(&self) -> Position {
        self.position.position()
    }

    /// Current connection state.
    pub fn connection(&self) -> ConnectionState {
        self.position.connection()
    }

    /// Latest status message.
    pub fn status_message(&self) -> &str {
        self.position.status_message()
    }

    /// Selected metric.
    pub fn metric_kind(&self) -> MetricKind {
        self.metrics.active_kind()
    }

    /// Value of the selected metric from the last update.
    pub fn metric_value(&self) -> f64 {
        self.metrics.current_value()
    }

    /// Last value of `kind`.
    pub fn metric(&self, kind: MetricKind) -> f64 {
        self.metrics.value(kind)
    }

    /// Metrics that can be selected.
    pub fn registered_metrics(&self) -> &[MetricKind] {
        self.metrics.registered()
    }

    /// Bookmark store.
    pub fn bookmarks(&self) -> &BookmarkStore {
        &self.bookmarks
    }

    /// Sweep lifecycle state.
    pub fn sequencer_state(&self) -> SequencerState {
        self.sequencer.state()
    }

    /// `(current_step, total_steps)` of the current or last sweep.
    pub fn sequence_progress(&self) -> (u32, u32) {
        self.sequencer.progress()
    }

    /// Series recorded by the current or last sweep.
    pub fn collected(&self) -> &[SeriesPoint] {
        self.sequencer.collected()
    }

    /// Sweep state machine.
    pub fn sequencer(&self) -> &AutoStepSequencer {
        &self.sequencer
    }

    /// Copy of the presentable state.
    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            position: self.position(),
            connection: self.connection(),
            status: self.status_message().to_string(),
            metric: self.metrics.snapshot(),
            sequencer: self.sequencer.state(),
            progress: self.sequencer.progress(),
            bookmarks: self.bookmarks.iter().cloned().collect(),
        }
    }

    fn ensure_idle(&self) -> AppResult<()> {
        if self.sequencer.is_running() {
            return Err(StageError::SequenceRunning);
        }
        Ok(())
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to the hardware adapter; failures degrade to simulation.
    pub async fn connect(&mut self) -> AppResult<ConnectionState> {
        self.ensure_idle()?;
        Ok(self.position.connect().await)
    }

    /// Drop the hardware connection; moves are refused until reconnecting.
    pub fn disconnect(&mut self) -> AppResult<()> {
        self.ensure_idle()?;
        self.position.disconnect();
        Ok(())
    }

    /// Switch to simulation mode, keeping the cached position.
    pub fn enter_simulation(&mut self) {
        self.position.enter_simulation("Simulation mode");
    }

    // =========================================================================
    // Motion
    // =========================================================================

    /// Move `axis` by `delta` microns.
    pub async fn move_stage(&mut self, axis: Axis, delta: f64) -> AppResult<MoveOutcome> {
        self.ensure_idle()?;
        self.position.move_stage(axis, delta).await
    }

    /// Move `axis` to an absolute target; `None` when already there.
    pub async fn set_position(&mut self, axis: Axis, target: f64) -> AppResult<Option<MoveOutcome>> {
        self.ensure_idle()?;
        self.position.set_position(axis, target).await
    }

    /// Move to `target`, skipping axes already in place.
    pub async fn set_xyz_position(&mut self, target: Position) -> AppResult<Vec<MoveOutcome>> {
        self.ensure_idle()?;
        self.position.set_xyz_position(target).await
    }

    /// Move to the bookmark at 1-based `index`.
    pub async fn goto_bookmark(&mut self, index: usize) -> AppResult<Vec<MoveOutcome>> {
        let target = self.bookmarks.get(index)?.position;
        self.set_xyz_position(target).await
    }

    /// Apply a joystick report as relative moves on every deflected axis.
    pub async fn jog(&mut self, report: &JoystickReport) -> AppResult<Vec<MoveOutcome>> {
        self.ensure_idle()?;
        let deltas = self.jog.deltas(report);
        if deltas.is_empty() {
            return Ok(Vec::new());
        }
        self.position.move_axes(&deltas).await
    }

    /// Poll hardware for external position changes; skipped while a sweep runs.
    pub async fn refresh_position(&mut self) -> bool {
        self.position
            .refresh_position(self.sequencer.is_running())
            .await
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    /// Recompute metrics at the current position.
    pub async fn update_metric(&mut self) -> MetricSnapshot {
        let connection = self.position.connection();
        let z = self.position.position().z;
        self.metrics.update(connection, z).await
    }

    /// Select a registered metric.
    pub fn set_metric_kind(&mut self, kind: MetricKind) -> AppResult<()> {
        self.metrics.set_metric_kind(kind)
    }

    /// Select a metric by its display name.
    pub fn set_metric_kind_by_name(&mut self, name: &str) -> AppResult<MetricKind> {
        self.metrics.set_metric_kind_by_name(name)
    }

    // =========================================================================
    // Bookmarks
    // =========================================================================

    /// Bookmark the current position with the current metric reading.
    pub fn add_bookmark(&mut self, label: &str) -> AppResult<Bookmark> {
        let position = self.position.position();
        let metric = self.metrics.snapshot();
        self.add_bookmark_at(label, position, metric)
    }

    /// Bookmark an explicit position and reading.
    pub fn add_bookmark_at(
        &mut self,
        label: &str,
        position: Position,
        metric: MetricSnapshot,
    ) -> AppResult<Bookmark> {
        validate_label(label)?;
        let bookmark = self.bookmarks.add(label, position, metric).clone();
        info!("Bookmark '{}' saved at {}", bookmark.label, bookmark.position);
        self.persist(&BookmarkRecord::added(&bookmark));
        Ok(bookmark)
    }

    /// Remove the bookmark at 1-based `index`.
    pub fn remove_bookmark(&mut self, index: usize) -> AppResult<Bookmark> {
        let removed = self.bookmarks.remove(index)?;
        info!("Bookmark '{}' removed", removed.label);
        self.persist(&BookmarkRecord::removed(&removed));
        Ok(removed)
    }

    /// Bookmark at 1-based `index`.
    pub fn bookmark(&self, index: usize) -> AppResult<&Bookmark> {
        self.bookmarks.get(index)
    }

    /// Rebuild bookmarks from persisted records without re-persisting them.
    pub fn restore_bookmarks<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = BookmarkRecord>,
    {
        self.bookmarks.restore(records)
    }

    fn persist(&mut self, record: &BookmarkRecord) {
        if let Some(sink) = self.metadata.as_mut() {
            if let Err(e) = sink.record(record) {
                warn!("Failed to persist bookmark '{}': {:#}", record.label, e);
            }
        }
    }

    // =========================================================================
    // Auto-step sweeps
    // =========================================================================

    /// Start a sweep. The caller drives it by calling
    /// [`sequence_tick`](Self::sequence_tick) every `params.delay`.
    pub fn start_sequence(&mut self, params: AutoStepParams) -> AppResult<()> {
        if params.delay < self.settings.stage.settle {
            warn!(
                "Auto-step delay {:?} is shorter than the settle time {:?}; ticks will queue",
                params.delay, self.settings.stage.settle
            );
        }
        self.sequencer.start(params)
    }

    /// Stop a running sweep; false if none was running.
    pub fn stop_sequence(&mut self) -> bool {
        self.sequencer.stop()
    }

    /// Run one sweep step: move, then metric update, then max-bookmark check.
    ///
    /// Returns true while the sweep keeps running. A step rejected by move
    /// validation ends the sweep and is reported through the status message.
    pub async fn sequence_tick(&mut self) -> bool {
        let Some(plan) = self.sequencer.begin_step() else {
            return false;
        };

        if let Err(e) = self.position.move_stage(Axis::Z, plan.delta).await {
            warn!("Auto-step step {} rejected: {}", plan.step, e);
            self.position
                .report(format!("Auto-step stopped at step {}: {}", plan.step, e));
            self.sequencer.abort();
            return false;
        }

        if plan.record {
            let snapshot = self.update_metric().await;
            let position = self.position.position();
            if self.sequencer.record(position, snapshot) {
                debug!("New {} maximum {:.3} at {}", snapshot.kind, snapshot.value, position);
                let record = match self
                    .bookmarks
                    .update_max(snapshot.kind, snapshot.value, position)
                {
                    Ok(bookmark) => Some(BookmarkRecord::max(bookmark)),
                    Err(e) => {
                        warn!("Max bookmark not updated: {}", e);
                        None
                    }
                };
                if let Some(record) = record {
                    self.persist(&record);
                }
            }
        }

        self.sequencer.finish_step()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Direction;
    use crate::hardware::mock::SimulatedAdapter;
    use crate::metadata::BookmarkOp;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Clone, Default)]
    struct MemorySink(Arc<Mutex<Vec<BookmarkRecord>>>);

    impl MetadataSink for MemorySink {
        fn record(&mut self, record: &BookmarkRecord) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl MetadataSink for FailingSink {
        fn record(&mut self, _record: &BookmarkRecord) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn sweep(step: f64, total: u32, direction: Direction) -> AutoStepParams {
        AutoStepParams::new(step, total, Duration::from_millis(100), direction, true)
    }

    #[tokio::test]
    async fn test_sweep_records_series_and_max_bookmark() {
        let mut controller = Controller::simulated(Settings::default());
        let sink = MemorySink::default();
        controller = controller.with_metadata(sink.clone());
        controller.set_position(Axis::Z, -10.0).await.unwrap();

        controller
            .start_sequence(sweep(2.0, 10, Direction::Up))
            .unwrap();
        while controller.sequence_tick().await {}

        assert_eq!(controller.position().z, 10.0);
        assert_eq!(controller.collected().len(), 10);
        // synthetic focus peaks at z = 0
        let max: Vec<&Bookmark> = controller
            .bookmarks()
            .iter()
            .filter(|b| b.label.starts_with("Max StdDev"))
            .collect();
        assert_eq!(max.len(), 1);
        assert_eq!(max[0].position.z, 0.0);
        let records = sink.0.lock().unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.op == BookmarkOp::Max));
    }

    #[test]
    #[traced_test]
    fn test_delay_shorter_than_settle_warns() {
        let mut controller = Controller::simulated(Settings::default());
        let params = AutoStepParams::new(1.0, 2, Duration::from_millis(10), Direction::Up, false);
        controller.start_sequence(params).unwrap();
        assert!(logs_contain("shorter than the settle time"));
        assert!(controller.sequencer().is_running());
    }

    #[tokio::test]
    async fn test_out_of_range_step_ends_sweep() {
        let mut settings = Settings::default();
        settings.stage.max_position = 5.0;
        let mut controller = Controller::simulated(settings);
        let mut rx = controller.subscribe();

        controller
            .start_sequence(sweep(2.0, 5, Direction::Up))
            .unwrap();
        let mut ticks = 0;
        while controller.sequence_tick().await {
            ticks += 1;
        }

        assert_eq!(ticks, 2);
        assert_eq!(controller.position().z, 4.0);
        assert_eq!(controller.sequencer_state(), SequencerState::Idle);
        assert_eq!(controller.sequence_progress(), (3, 5));
        assert!(controller.status_message().contains("Auto-step stopped"));
        let complete = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| *e == StageEvent::AutoStepComplete)
            .count();
        assert_eq!(complete, 1);
    }

    #[tokio::test]
    async fn test_manual_moves_refused_while_running() {
        let mut controller = Controller::simulated(Settings::default());
        controller
            .start_sequence(sweep(1.0, 3, Direction::Down))
            .unwrap();

        assert!(matches!(
            controller.move_stage(Axis::X, 1.0).await,
            Err(StageError::SequenceRunning)
        ));
        assert!(controller.connect().await.is_err());
        assert!(controller.stop_sequence());
        assert!(controller.move_stage(Axis::X, 1.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_bookmark_roundtrip_through_goto() {
        let mut controller = Controller::simulated(Settings::default());
        controller
            .set_xyz_position(Position::new(1.0, 2.0, 3.0))
            .await
            .unwrap();
        controller.update_metric().await;
        let saved = controller.add_bookmark("Focus A").unwrap();
        assert!(saved.metric.is_available());

        controller
            .set_xyz_position(Position::new(9.0, 9.0, 9.0))
            .await
            .unwrap();
        controller.goto_bookmark(1).await.unwrap();
        assert_eq!(controller.position(), Position::new(1.0, 2.0, 3.0));

        assert!(controller.add_bookmark("bad/label").is_err());
        assert!(controller.goto_bookmark(2).await.is_err());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_fail_operation() {
        let mut controller = Controller::simulated(Settings::default()).with_metadata(FailingSink);
        assert!(controller.add_bookmark("Focus A").is_ok());
        assert!(controller.remove_bookmark(1).is_ok());
        assert!(controller.bookmarks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jog_moves_connected_stage() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let mut controller = Controller::new(Settings::default(), Some(adapter.clone()));
        assert_eq!(controller.connect().await.unwrap(), ConnectionState::Connected);

        let report = JoystickReport::parse(&[127, 0, 0x81, 0, 255]).unwrap();
        let outcomes = controller.jog(&report).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(adapter.true_position().await, Position::new(10.0, 0.0, -10.0));
        assert_eq!(controller.position(), Position::new(10.0, 0.0, -10.0));
    }

    #[tokio::test]
    async fn test_from_settings_restores_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.application.metadata_path =
            Some(dir.path().join("data").join("bookmarks.jsonl"));

        {
            let mut controller = Controller::from_settings(settings.clone(), None).unwrap();
            controller.add_bookmark("Focus A").unwrap();
            controller.add_bookmark("Focus B").unwrap();
            controller.remove_bookmark(1).unwrap();
        }

        let controller = Controller::from_settings(settings, None).unwrap();
        assert_eq!(controller.bookmarks().labels(), vec!["Focus B"]);
    }

    #[tokio::test]
    async fn test_reload_keeps_max_and_prefixed_user_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.application.metadata_path = Some(dir.path().join("bookmarks.jsonl"));

        let live = {
            let mut controller = Controller::from_settings(settings.clone(), None).unwrap();
            controller.set_position(Axis::Z, -4.0).await.unwrap();
            controller
                .start_sequence(sweep(2.0, 4, Direction::Up))
                .unwrap();
            while controller.sequence_tick().await {}
            controller.add_bookmark("Max StdDev point").unwrap();
            controller.bookmarks().clone()
        };
        assert_eq!(live.len(), 2);

        let controller = Controller::from_settings(settings, None).unwrap();
        assert_eq!(controller.bookmarks(), &live);
    }
}
