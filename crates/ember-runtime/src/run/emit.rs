//! Dual-sink event emission.

use std::sync::Arc;

use ember_core::events::AgentEvent;
use tracing::trace;

use crate::bus::EventBus;
use crate::sink::SinkDispatcher;

/// The two observers every run event goes to: the process-wide bus and the
/// optional per-run callback.
///
/// Both receive the same event value. Neither call waits.
pub(crate) struct EventSinks {
    bus: Arc<EventBus>,
    callback: Option<SinkDispatcher<AgentEvent>>,
}

impl EventSinks {
    pub(crate) fn new(bus: Arc<EventBus>, callback: Option<SinkDispatcher<AgentEvent>>) -> Self {
        Self { bus, callback }
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        trace!(run_id = %event.run_id, stream = %event.stream(), "emit");
        if let Some(callback) = &self.callback {
            callback.dispatch(event.clone());
        }
        let _ = self.bus.publish(event);
    }

    pub(crate) async fn flush(&self) {
        if let Some(callback) = &self.callback {
            callback.flush().await;
        }
    }
}
