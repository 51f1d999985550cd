//! Process-wide broadcast bus for [`AgentEvent`] publication.
//!
//! The bus is shared by every run in the process. Publishing never awaits;
//! slow subscribers lag and lose events instead of blocking a run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use ember_core::events::AgentEvent;
use ember_core::ids::RunId;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast-based event bus.
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
    publish_count: AtomicU64,
}

impl EventBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            publish_count: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers. Non-blocking, best-effort.
    ///
    /// Returns the number of receivers that received the event (0 when
    /// nobody is subscribed).
    pub fn publish(&self, event: AgentEvent) -> usize {
        let _ = self.publish_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to the events of a single run.
    pub fn subscribe_run(&self, run_id: RunId) -> RunSubscription {
        RunSubscription {
            run_id,
            rx: self.tx.subscribe(),
        }
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total number of events published.
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("publish_count", &self.publish_count())
            .finish()
    }
}

/// Receiver filtered to one run.
pub struct RunSubscription {
    run_id: RunId,
    rx: broadcast::Receiver<AgentEvent>,
}

impl RunSubscription {
    /// Next event for this run.
    ///
    /// Lagged gaps are skipped with a warning. Returns `None` once the bus
    /// is dropped.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.run_id == self.run_id => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(run_id = %self.run_id, skipped, "run subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event for this run, without waiting.
    pub fn try_recv(&mut self) -> Option<AgentEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.run_id == self.run_id => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

static GLOBAL_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

/// The process-wide bus, sized from settings on first access.
pub fn global() -> &'static Arc<EventBus> {
    GLOBAL_BUS.get_or_init(|| {
        let capacity = ember_settings::get_settings().lifecycle.bus_capacity;
        Arc::new(EventBus::with_capacity(capacity))
    })
}
