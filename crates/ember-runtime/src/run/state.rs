//! Per-run mutable state.
//!
//! [`RunState`] is owned by exactly one [`LifecycleDispatcher`] and is never
//! shared across runs. It holds the three racing sources of reply text
//! (delta buffer, block buffer, finished assistant texts), block formatting
//! state, the optional chunker, and the compaction coordinator.
//!
//! [`LifecycleDispatcher`]: crate::run::dispatcher::LifecycleDispatcher

use ember_core::ids::RunId;

use crate::chunker::BlockChunker;
use crate::formatting::BlockState;
use crate::run::compaction::CompactionCoordinator;

/// Buffer lengths at the start of the current attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttemptBaseline {
    /// `delta_buffer` length in bytes.
    pub delta_len: usize,
    /// `block_buffer` length in bytes.
    pub block_len: usize,
    /// Number of assistant texts.
    pub assistant_texts: usize,
}

/// Mutable state of one run.
pub struct RunState {
    pub(crate) run_id: RunId,
    pub(crate) delta_buffer: String,
    pub(crate) block_buffer: String,
    pub(crate) assistant_texts: Vec<String>,
    pub(crate) block_state: BlockState,
    pub(crate) block_chunker: Option<Box<dyn BlockChunker>>,
    pub(crate) compaction: CompactionCoordinator,
    pub(crate) baseline: AttemptBaseline,
}

impl RunState {
    /// Fresh state for `run_id`.
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            delta_buffer: String::new(),
            block_buffer: String::new(),
            assistant_texts: Vec::new(),
            block_state: BlockState::default(),
            block_chunker: None,
            compaction: CompactionCoordinator::new(),
            baseline: AttemptBaseline::default(),
        }
    }

    /// Attach a block chunker. Block text is routed to it instead of the
    /// raw block buffer.
    #[must_use]
    pub fn with_chunker(mut self, chunker: Box<dyn BlockChunker>) -> Self {
        self.block_chunker = Some(chunker);
        self
    }

    /// Run identifier.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Raw incremental text since the last flush.
    pub fn delta_buffer(&self) -> &str {
        &self.delta_buffer
    }

    /// Block text not routed through a chunker.
    pub fn block_buffer(&self) -> &str {
        &self.block_buffer
    }

    /// Assistant texts recognized as complete.
    pub fn assistant_texts(&self) -> &[String] {
        &self.assistant_texts
    }

    /// Current block formatting state.
    pub fn block_state(&self) -> &BlockState {
        &self.block_state
    }

    /// Compaction coordinator.
    pub fn compaction(&self) -> &CompactionCoordinator {
        &self.compaction
    }

    /// Baseline of the current attempt.
    pub fn baseline(&self) -> AttemptBaseline {
        self.baseline
    }

    /// Whether a chunker holds undrained text.
    pub fn chunker_has_buffered(&self) -> bool {
        self.block_chunker
            .as_ref()
            .is_some_and(|chunker| chunker.has_buffered())
    }

    // ── stream ingestion ────────────────────────────────────────────

    /// Append raw incremental text.
    pub fn push_delta(&mut self, delta: &str) {
        self.delta_buffer.push_str(delta);
    }

    /// Append structured block text.
    pub fn push_block(&mut self, text: &str) {
        self.block_state.observe(text);
        match self.block_chunker.as_mut() {
            Some(chunker) => chunker.append(text),
            None => self.block_buffer.push_str(text),
        }
    }

    /// Record an assistant text recognized as complete.
    pub fn push_assistant_text(&mut self, text: impl Into<String>) {
        self.assistant_texts.push(text.into());
    }

    /// Clear the delta and block buffers after the normal per-message path
    /// delivered their content.
    pub fn clear_stream_buffers(&mut self) {
        self.delta_buffer.clear();
        self.block_buffer.clear();
        // Text written after this point belongs to the current attempt.
        self.baseline.delta_len = 0;
        self.baseline.block_len = 0;
    }

    /// Start a new attempt at the current buffer lengths.
    pub fn mark_attempt_start(&mut self) {
        self.baseline = AttemptBaseline {
            delta_len: self.delta_buffer.len(),
            block_len: self.block_buffer.len(),
            assistant_texts: self.assistant_texts.len(),
        };
    }

    /// Discard everything the failed attempt produced.
    ///
    /// The retried attempt resends that text, so keeping it would duplicate
    /// it in the final reply.
    pub(crate) fn reset_for_compaction_retry(&mut self) {
        let delta_len = self.baseline.delta_len.min(self.delta_buffer.len());
        let block_len = self.baseline.block_len.min(self.block_buffer.len());
        truncate_at_boundary(&mut self.delta_buffer, delta_len);
        truncate_at_boundary(&mut self.block_buffer, block_len);
        self.assistant_texts.truncate(self.baseline.assistant_texts);
        self.block_state.reset();
        if let Some(chunker) = self.block_chunker.as_mut() {
            chunker.reset();
        }
        self.mark_attempt_start();
    }
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("run_id", &self.run_id)
            .field("delta_len", &self.delta_buffer.len())
            .field("block_len", &self.block_buffer.len())
            .field("assistant_texts", &self.assistant_texts.len())
            .field("block_state", &self.block_state)
            .field("has_chunker", &self.block_chunker.is_some())
            .field("compaction", &self.compaction)
            .finish()
    }
}

fn truncate_at_boundary(s: &mut String, len: usize) {
    let mut end = len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ChunkerCall, ScriptedChunker};

    fn state() -> RunState {
        RunState::new(RunId::from("r1"))
    }

    #[test]
    fn new_state_is_empty() {
        let s = state();
        assert_eq!(s.run_id().as_str(), "r1");
        assert!(s.delta_buffer().is_empty());
        assert!(s.block_buffer().is_empty());
        assert!(s.assistant_texts().is_empty());
        assert_eq!(s.block_state(), &BlockState::default());
        assert!(!s.compaction().in_flight());
        assert!(!s.chunker_has_buffered());
    }

    #[test]
    fn block_text_goes_to_chunker_when_present() {
        let chunker = ScriptedChunker::new();
        let mut s = state().with_chunker(Box::new(chunker.clone()));
        s.push_block("para");

        assert!(s.block_buffer().is_empty());
        assert!(s.chunker_has_buffered());
        assert_eq!(chunker.calls()[0], ChunkerCall::Append("para".into()));
    }

    #[test]
    fn push_block_tracks_regions() {
        let mut s = state();
        s.push_block("<think>hmm");
        assert!(s.block_state().thinking);
        assert_eq!(s.block_buffer(), "<think>hmm");
    }

    #[test]
    fn clear_stream_buffers_keeps_assistant_texts() {
        let mut s = state();
        s.push_delta("d");
        s.push_block("b");
        s.push_assistant_text("done");
        s.clear_stream_buffers();

        assert!(s.delta_buffer().is_empty());
        assert!(s.block_buffer().is_empty());
        assert_eq!(s.assistant_texts(), ["done"]);
    }

    #[test]
    fn retry_reset_rewinds_to_baseline() {
        let mut s = state();
        s.push_delta("kept ");
        s.push_block("kept block ");
        s.push_assistant_text("earlier reply");
        s.mark_attempt_start();

        s.push_delta("failed attempt");
        s.push_block("<think>partial");
        s.push_assistant_text("failed reply");
        s.reset_for_compaction_retry();

        assert_eq!(s.delta_buffer(), "kept ");
        assert_eq!(s.block_buffer(), "kept block ");
        assert_eq!(s.assistant_texts(), ["earlier reply"]);
        assert!(!s.block_state().thinking);
    }

    #[test]
    fn retry_reset_survives_cleared_buffers() {
        let mut s = state();
        s.push_delta("0123456789");
        s.mark_attempt_start();
        s.clear_stream_buffers();
        s.push_delta("new");
        s.reset_for_compaction_retry();

        assert!(s.delta_buffer().is_empty());
        assert_eq!(s.baseline().delta_len, 0);
    }

    #[test]
    fn retry_reset_drops_longer_failed_attempt_after_clear() {
        let mut s = state();
        s.push_delta("0123456789");
        s.push_block("0123456789");
        s.mark_attempt_start();
        s.clear_stream_buffers();
        s.push_delta("failed attempt text");
        s.push_block("failed attempt block");
        s.reset_for_compaction_retry();

        assert!(s.delta_buffer().is_empty());
        assert!(s.block_buffer().is_empty());
        assert_eq!(s.baseline(), AttemptBaseline::default());
    }

    #[test]
    fn retry_reset_resets_chunker() {
        let chunker = ScriptedChunker::new();
        let mut s = state().with_chunker(Box::new(chunker.clone()));
        s.push_block("partial");
        s.reset_for_compaction_retry();

        assert!(!s.chunker_has_buffered());
        assert!(chunker.calls().contains(&ChunkerCall::Reset));
    }

    #[test]
    fn truncate_snaps_to_char_boundary() {
        let mut s = String::from("ab—cd");
        truncate_at_boundary(&mut s, 3);
        assert_eq!(s, "ab");
    }
}
