//! Change notifications for the presentation layer.
//!
//! Events carry no payload; subscribers re-read the state they care about from
//! the controller. Events are sent synchronously at the point a change is
//! committed, on the task that made the change.
//!
//! ```text
//! Controller --[StageEvent]--> broadcast::channel ---> UI / loggers
//! ```

use tokio::sync::broadcast;
use tracing::trace;

/// The four change notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageEvent {
    /// Connection state or status message changed.
    StatusChanged,
    /// Cached stage position changed.
    PositionChanged,
    /// Metric values or the selected kind changed.
    MetricChanged,
    /// An auto-step sequence ended, either naturally or by `stop()`.
    AutoStepComplete,
}

/// Typed broadcast channel for [`StageEvent`]s.
///
/// Cloning shares the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<StageEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: StageEvent) {
        trace!(?event, "emit");
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
