//! Per-run lifecycle dispatch.
//!
//! The run driver feeds lifecycle signals, in arrival order, into one
//! [`LifecycleDispatcher`]. Each signal updates the run's state and emits
//! zero or more events to the process-wide bus and the per-run callback.
//! Stream text reaches the same dispatcher through the `push_*` methods.

use std::sync::Arc;

use ember_core::events::{
    AgentEvent, compaction_end_event, compaction_start_event, lifecycle_start_event,
};
use ember_core::ids::RunId;
use ember_settings::EmberSettings;
use tracing::debug;

use crate::bus::{self, EventBus};
use crate::chunker::{BlockChunker, DrainOptions};
use crate::errors::LifecycleError;
use crate::formatting::{SpanStripper, TagStripper};
use crate::run::block_flush;
use crate::run::compaction::{CompactionOutcome, CompactionWait};
use crate::run::emit::EventSinks;
use crate::run::fallback;
use crate::run::state::RunState;
use crate::sink::{BlockReply, Sink, SinkDispatcher};

/// Lifecycle signal from the run driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The run started.
    Start,
    /// A context-compaction pass started.
    CompactionStart,
    /// A context-compaction pass ended.
    CompactionEnd {
        /// The provider will retry the attempt that triggered compaction.
        will_retry: bool,
    },
    /// The run finished. Last signal of every run.
    End,
}

impl LifecycleSignal {
    /// Name for logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::CompactionStart => "compaction_start",
            Self::CompactionEnd { .. } => "compaction_end",
            Self::End => "end",
        }
    }
}

/// What the run did at its end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// A fallback `assistant` event was emitted.
    pub fallback_emitted: bool,
    /// Block chunks sent by the run-end flush.
    pub block_chunks_flushed: usize,
    /// Compaction retries noted over the run.
    pub compaction_retries: u32,
    /// Outcome delivered to compaction waiters at run end.
    pub compaction_outcome: Option<CompactionOutcome>,
}

/// Runtime options for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Bound of each per-run sink queue.
    pub callback_queue_capacity: usize,
}

impl RunOptions {
    /// Options from loaded settings.
    pub fn from_settings(settings: &EmberSettings) -> Self {
        Self {
            callback_queue_capacity: settings.lifecycle.callback_queue_capacity,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_settings(&EmberSettings::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for a [`LifecycleDispatcher`].
///
/// ```ignore
/// let mut run = RunBuilder::new(run_id)
///     .on_agent_event(sink_fn("ui", |event| async move { forward(event).await }))
///     .build();
/// run.handle(LifecycleSignal::Start)?;
/// ```
pub struct RunBuilder {
    run_id: RunId,
    bus: Option<Arc<EventBus>>,
    on_agent_event: Option<Arc<dyn Sink<AgentEvent>>>,
    on_block_reply: Option<Arc<dyn Sink<BlockReply>>>,
    chunker: Option<Box<dyn BlockChunker>>,
    stripper: Option<Arc<dyn SpanStripper>>,
    options: Option<RunOptions>,
}

impl RunBuilder {
    /// Start building a run.
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            bus: None,
            on_agent_event: None,
            on_block_reply: None,
            chunker: None,
            stripper: None,
            options: None,
        }
    }

    /// Publish to `bus` instead of [`bus::global`].
    #[must_use]
    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Per-run agent-event callback.
    #[must_use]
    pub fn on_agent_event(mut self, sink: Arc<dyn Sink<AgentEvent>>) -> Self {
        self.on_agent_event = Some(sink);
        self
    }

    /// Block-reply callback. Without one, block text is never flushed.
    #[must_use]
    pub fn on_block_reply(mut self, sink: Arc<dyn Sink<BlockReply>>) -> Self {
        self.on_block_reply = Some(sink);
        self
    }

    /// Route block text through `chunker`.
    #[must_use]
    pub fn chunker(mut self, chunker: Box<dyn BlockChunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Replace the default [`TagStripper`].
    #[must_use]
    pub fn stripper(mut self, stripper: Arc<dyn SpanStripper>) -> Self {
        self.stripper = Some(stripper);
        self
    }

    /// Override options from global settings.
    #[must_use]
    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Create the dispatcher. Spawns one worker per configured callback, so
    /// this must run inside a tokio runtime when callbacks are set.
    pub fn build(self) -> LifecycleDispatcher {
        let options = self
            .options
            .unwrap_or_else(|| RunOptions::from_settings(ember_settings::get_settings()));
        let capacity = options.callback_queue_capacity;
        let bus = self.bus.unwrap_or_else(|| Arc::clone(bus::global()));

        let mut state = RunState::new(self.run_id);
        if let Some(chunker) = self.chunker {
            state = state.with_chunker(chunker);
        }

        LifecycleDispatcher {
            state,
            events: EventSinks::new(
                bus,
                self.on_agent_event
                    .map(|sink| SinkDispatcher::spawn(sink, capacity)),
            ),
            block_replies: self
                .on_block_reply
                .map(|sink| SinkDispatcher::spawn(sink, capacity)),
            stripper: self.stripper.unwrap_or_else(|| Arc::new(TagStripper)),
            ended: false,
            report: RunReport::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Owns one run's state and turns lifecycle signals into events.
pub struct LifecycleDispatcher {
    state: RunState,
    events: EventSinks,
    block_replies: Option<SinkDispatcher<BlockReply>>,
    stripper: Arc<dyn SpanStripper>,
    ended: bool,
    report: RunReport,
}

impl LifecycleDispatcher {
    /// Handle one lifecycle signal.
    ///
    /// Sink failures never surface here. The only error is a signal that
    /// arrives after `End` was handled.
    pub fn handle(&mut self, signal: LifecycleSignal) -> Result<(), LifecycleError> {
        self.ensure_open(signal.name())?;
        let run_id = self.state.run_id.clone();
        debug!(run_id = %run_id, signal = signal.name(), "lifecycle signal");

        match signal {
            LifecycleSignal::Start => {
                self.events.emit(lifecycle_start_event(&run_id));
            }
            LifecycleSignal::CompactionStart => {
                self.state.compaction.begin();
                self.events.emit(compaction_start_event(&run_id));
            }
            LifecycleSignal::CompactionEnd { will_retry } => {
                self.state.compaction.end(will_retry);
                if will_retry {
                    self.state.reset_for_compaction_retry();
                    debug!(
                        run_id = %run_id,
                        pending = self.state.compaction.pending_retry(),
                        "compaction retry noted"
                    );
                }
                self.events.emit(compaction_end_event(&run_id, will_retry));
            }
            LifecycleSignal::End => self.finish(),
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.report.fallback_emitted =
            fallback::maybe_emit(&self.state, self.stripper.as_ref(), &self.events);
        self.report.block_chunks_flushed =
            block_flush::flush_and_reset(
                &mut self.state,
                self.block_replies.as_ref(),
                self.stripper.as_ref(),
            );
        self.report.compaction_outcome = self.state.compaction.settle();
        self.report.compaction_retries = self.state.compaction.retries_total();
        self.ended = true;
        debug!(
            run_id = %self.state.run_id,
            fallback = self.report.fallback_emitted,
            block_chunks = self.report.block_chunks_flushed,
            retries = self.report.compaction_retries,
            "run ended"
        );
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), LifecycleError> {
        if self.ended {
            debug!(run_id = %self.state.run_id, operation, "rejected after run end");
            return Err(LifecycleError::RunEnded {
                run_id: self.state.run_id.clone(),
                operation,
            });
        }
        Ok(())
    }

    // ── stream ingestion ────────────────────────────────────────────

    /// Append raw incremental text.
    pub fn push_delta(&mut self, delta: &str) -> Result<(), LifecycleError> {
        self.ensure_open("push_delta")?;
        self.state.push_delta(delta);
        Ok(())
    }

    /// Append structured block text. With a chunker and a block-reply sink,
    /// complete chunks are forwarded right away.
    pub fn push_block(&mut self, text: &str) -> Result<(), LifecycleError> {
        self.ensure_open("push_block")?;
        self.state.push_block(text);
        if let (Some(sink), Some(chunker)) =
            (self.block_replies.as_ref(), self.state.block_chunker.as_mut())
        {
            let _ = block_flush::drain_into(
                &mut **chunker,
                DrainOptions::READY,
                &self.state.run_id,
                sink,
                self.stripper.as_ref(),
            );
        }
        Ok(())
    }

    /// Record an assistant text recognized as complete.
    pub fn push_assistant_text(&mut self, text: impl Into<String>) -> Result<(), LifecycleError> {
        self.ensure_open("push_assistant_text")?;
        self.state.push_assistant_text(text);
        Ok(())
    }

    /// The per-message path delivered the buffered text; drop it.
    pub fn clear_stream_buffers(&mut self) -> Result<(), LifecycleError> {
        self.ensure_open("clear_stream_buffers")?;
        self.state.clear_stream_buffers();
        Ok(())
    }

    /// A new attempt starts; a later compaction retry rewinds to here.
    pub fn mark_attempt_start(&mut self) -> Result<(), LifecycleError> {
        self.ensure_open("mark_attempt_start")?;
        self.state.mark_attempt_start();
        Ok(())
    }

    // ── accessors ───────────────────────────────────────────────────

    /// Handle that resolves when compaction settles.
    pub fn compaction_wait(&self) -> CompactionWait {
        self.state.compaction.wait_handle()
    }

    /// Run identifier.
    pub fn run_id(&self) -> &RunId {
        &self.state.run_id
    }

    /// Current run state.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Whether `End` was handled.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Summary of the run end. Default until `End` is handled.
    pub fn report(&self) -> RunReport {
        self.report
    }

    /// Wait until both callbacks have handled everything emitted so far.
    pub async fn flush_sinks(&self) {
        self.events.flush().await;
        if let Some(block_replies) = &self.block_replies {
            block_replies.flush().await;
        }
    }
}

impl std::fmt::Debug for LifecycleDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDispatcher")
            .field("state", &self.state)
            .field("ended", &self.ended)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::compaction::CompactionPhase;
    use crate::sink::sink_fn;
    use crate::test_support::{ChunkerCall, RecordingSink, RejectingSink, ScriptedChunker};
    use assert_matches::assert_matches;
    use ember_core::events::{AgentStream, EventPayload};
    use ember_core::logging::capture_logs;
    use tracing::Level;

    struct Harness {
        run: LifecycleDispatcher,
        events: Arc<RecordingSink<AgentEvent>>,
        blocks: Arc<RecordingSink<BlockReply>>,
        bus: Arc<EventBus>,
    }

    fn harness(chunker: Option<ScriptedChunker>) -> Harness {
        let bus = Arc::new(EventBus::new());
        let events = RecordingSink::new("agent-events");
        let blocks = RecordingSink::new("block-replies");
        let mut builder = RunBuilder::new(RunId::from("run-1"))
            .bus(Arc::clone(&bus))
            .on_agent_event(events.clone())
            .on_block_reply(blocks.clone())
            .options(RunOptions {
                callback_queue_capacity: 64,
            });
        if let Some(chunker) = chunker {
            builder = builder.chunker(Box::new(chunker));
        }
        Harness {
            run: builder.build(),
            events,
            blocks,
            bus,
        }
    }

    fn streams(events: &[AgentEvent]) -> Vec<AgentStream> {
        events.iter().map(AgentEvent::stream).collect()
    }

    #[tokio::test]
    async fn start_emits_lifecycle_to_both_sinks() {
        let mut h = harness(None);
        let mut rx = h.bus.subscribe();
        h.run.handle(LifecycleSignal::Start).unwrap();
        h.run.flush_sinks().await;

        let from_bus = rx.recv().await.unwrap();
        let from_callback = h.events.items();
        assert_eq!(from_callback, vec![from_bus.clone()]);
        assert_matches!(
            from_bus.payload,
            EventPayload::Lifecycle(ref data) if data.started_at.is_some()
        );
        assert!(h.run.state().delta_buffer().is_empty());
    }

    #[tokio::test]
    async fn compaction_events_carry_will_retry() {
        let mut h = harness(None);
        h.run.handle(LifecycleSignal::CompactionStart).unwrap();
        assert_eq!(h.run.state().compaction().phase(), CompactionPhase::InFlight);
        h.run
            .handle(LifecycleSignal::CompactionEnd { will_retry: true })
            .unwrap();
        h.run.flush_sinks().await;

        let events = h.events.items();
        assert_eq!(streams(&events), vec![AgentStream::Compaction; 2]);
        assert_matches!(
            events[1].payload,
            EventPayload::Compaction(ref data) if data.will_retry == Some(true)
        );
        assert_eq!(h.run.state().compaction().pending_retry(), 1);
    }

    #[tokio::test]
    async fn retry_discards_failed_attempt_text() {
        let mut h = harness(None);
        h.run.handle(LifecycleSignal::Start).unwrap();
        h.run.push_delta("partial reply that will be resent").unwrap();
        h.run.handle(LifecycleSignal::CompactionStart).unwrap();
        h.run
            .handle(LifecycleSignal::CompactionEnd { will_retry: true })
            .unwrap();
        assert!(h.run.state().delta_buffer().is_empty());

        h.run.push_delta("full reply").unwrap();
        h.run.handle(LifecycleSignal::End).unwrap();
        h.run.flush_sinks().await;

        let texts: Vec<_> = h
            .events
            .items()
            .iter()
            .filter_map(|e| e.assistant_text().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["full reply"]);
    }

    #[tokio::test]
    async fn end_order_is_fallback_then_block_flush_then_settle() {
        let mut h = harness(None);
        h.run.handle(LifecycleSignal::CompactionStart).unwrap();
        let wait = h.run.compaction_wait();
        h.run
            .handle(LifecycleSignal::CompactionEnd { will_retry: true })
            .unwrap();
        h.run.push_block("<final>answer</final>").unwrap();
        h.run.handle(LifecycleSignal::End).unwrap();
        h.run.flush_sinks().await;

        let events = h.events.items();
        assert_eq!(events.last().and_then(AgentEvent::assistant_text), Some("answer"));
        assert_eq!(h.blocks.items()[0].text, "answer");
        assert!(h.run.state().block_buffer().is_empty());
        assert_eq!(
            wait.await,
            CompactionOutcome::RetriesSettled { retries: 1 }
        );

        let report = h.run.report();
        assert!(report.fallback_emitted);
        assert_eq!(report.block_chunks_flushed, 1);
        assert_eq!(report.compaction_retries, 1);
    }

    #[tokio::test]
    async fn streamed_chunks_forwarded_before_end() {
        let chunker = ScriptedChunker::new();
        let mut h = harness(Some(chunker.clone()));
        h.run.push_block("first paragraph\n\nsecond").unwrap();
        h.run.flush_sinks().await;
        assert_eq!(h.blocks.items().len(), 1);

        h.run.handle(LifecycleSignal::End).unwrap();
        h.run.flush_sinks().await;

        let texts: Vec<_> = h.blocks.items().into_iter().map(|b| b.text).collect();
        assert_eq!(texts, vec!["first paragraph", "second"]);
        assert!(chunker.calls().contains(&ChunkerCall::Drain { force: true }));
        assert_eq!(h.run.report().block_chunks_flushed, 1);
    }

    #[tokio::test]
    async fn signals_after_end_are_rejected() {
        let mut h = harness(None);
        h.run.handle(LifecycleSignal::End).unwrap();

        let err = h.run.handle(LifecycleSignal::Start).unwrap_err();
        assert_matches!(err, LifecycleError::RunEnded { operation: "start", .. });
        assert_matches!(
            h.run.push_delta("late"),
            Err(LifecycleError::RunEnded { operation: "push_delta", .. })
        );
        assert!(h.run.is_ended());
    }

    #[tokio::test]
    async fn failing_callback_does_not_interrupt_run() {
        let (logs, _guard) = capture_logs();
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let mut run = RunBuilder::new(RunId::from("run-2"))
            .bus(Arc::clone(&bus))
            .on_agent_event(Arc::new(RejectingSink))
            .on_block_reply(sink_fn("panicky", |block: BlockReply| async move {
                assert!(block.text.is_empty(), "consumer crashed");
                Ok(())
            }))
            .options(RunOptions::default())
            .build();

        run.handle(LifecycleSignal::Start).unwrap();
        run.push_block("block").unwrap();
        run.handle(LifecycleSignal::CompactionStart).unwrap();
        let wait = run.compaction_wait();
        run.handle(LifecycleSignal::CompactionEnd { will_retry: false })
            .unwrap();
        run.handle(LifecycleSignal::End).unwrap();
        run.flush_sinks().await;

        assert_eq!(wait.await, CompactionOutcome::Completed);
        assert_eq!(rx.recv().await.unwrap().stream(), AgentStream::Lifecycle);
        assert!(logs.count_at_level(Level::WARN) >= 2);
        assert_eq!(run.report().block_chunks_flushed, 1);
    }

    #[test]
    fn signal_names() {
        assert_eq!(LifecycleSignal::Start.name(), "start");
        assert_eq!(
            LifecycleSignal::CompactionEnd { will_retry: false }.name(),
            "compaction_end"
        );
    }

    #[test]
    fn options_from_settings() {
        let mut settings = EmberSettings::default();
        settings.lifecycle.callback_queue_capacity = 7;
        assert_eq!(
            RunOptions::from_settings(&settings).callback_queue_capacity,
            7
        );
    }
}
