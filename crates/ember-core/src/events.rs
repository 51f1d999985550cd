//! Outbound agent events.
//!
//! Every emission of the run coordinator is an [`AgentEvent`]: the run it
//! belongs to, the stream it was emitted on, and stream-specific data.
//!
//! ```json
//! { "runId": "…", "stream": "compaction", "data": { "phase": "end", "willRetry": true } }
//! ```
//!
//! The same immutable value is delivered to the process-wide bus and to the
//! per-run callback, so both observers see identical content.

use serde::{Deserialize, Serialize};

use crate::ids::RunId;

// ─────────────────────────────────────────────────────────────────────────────
// Streams and payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Stream an event was emitted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStream {
    /// Run lifecycle (start).
    Lifecycle,
    /// Context compaction sub-lifecycle.
    Compaction,
    /// Assistant reply text.
    Assistant,
}

impl AgentStream {
    /// Wire name of the stream.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Compaction => "compaction",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for AgentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase marker shared by lifecycle and compaction data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Phase started.
    Start,
    /// Phase ended.
    End,
}

/// Data for the `lifecycle` stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleData {
    /// Lifecycle phase.
    pub phase: Phase,
    /// Unix epoch milliseconds at which the run started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
}

/// Data for the `compaction` stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionData {
    /// Compaction phase.
    pub phase: Phase,
    /// Whether the compacted attempt will be retried. Only set on `end`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_retry: Option<bool>,
}

/// Data for the `assistant` stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantData {
    /// Final assistant text.
    pub text: String,
}

/// Stream tag plus its data, serialized as `"stream"` / `"data"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stream", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Lifecycle data.
    Lifecycle(LifecycleData),
    /// Compaction data.
    Compaction(CompactionData),
    /// Assistant data.
    Assistant(AssistantData),
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentEvent
// ─────────────────────────────────────────────────────────────────────────────

/// One outbound event, correlated by run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Stream and data.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl AgentEvent {
    /// Stream this event belongs to.
    pub fn stream(&self) -> AgentStream {
        match self.payload {
            EventPayload::Lifecycle(_) => AgentStream::Lifecycle,
            EventPayload::Compaction(_) => AgentStream::Compaction,
            EventPayload::Assistant(_) => AgentStream::Assistant,
        }
    }

    /// Assistant text, if this is an `assistant` event.
    pub fn assistant_text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Assistant(data) => Some(&data.text),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Create a lifecycle-start event stamped with the current time.
#[must_use]
pub fn lifecycle_start_event(run_id: &RunId) -> AgentEvent {
    AgentEvent {
        run_id: run_id.clone(),
        payload: EventPayload::Lifecycle(LifecycleData {
            phase: Phase::Start,
            started_at: Some(chrono::Utc::now().timestamp_millis()),
        }),
    }
}

/// Create a compaction-start event.
#[must_use]
pub fn compaction_start_event(run_id: &RunId) -> AgentEvent {
    AgentEvent {
        run_id: run_id.clone(),
        payload: EventPayload::Compaction(CompactionData {
            phase: Phase::Start,
            will_retry: None,
        }),
    }
}

/// Create a compaction-end event.
#[must_use]
pub fn compaction_end_event(run_id: &RunId, will_retry: bool) -> AgentEvent {
    AgentEvent {
        run_id: run_id.clone(),
        payload: EventPayload::Compaction(CompactionData {
            phase: Phase::End,
            will_retry: Some(will_retry),
        }),
    }
}

/// Create an assistant text event.
#[must_use]
pub fn assistant_event(run_id: &RunId, text: impl Into<String>) -> AgentEvent {
    AgentEvent {
        run_id: run_id.clone(),
        payload: EventPayload::Assistant(AssistantData { text: text.into() }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
