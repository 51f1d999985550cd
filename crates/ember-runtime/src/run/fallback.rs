//! Fallback reply synthesis at run end.
//!
//! When the provider never delivered a clean per-message completion, the
//! run's reply is still sitting in one of three buffers. The normal
//! completion path clears them after delivering, so anything left at run
//! end has not been sent yet.

use ember_core::events::assistant_event;
use metrics::counter;
use tracing::debug;

use crate::formatting::{SpanStripper, StripOptions};
use crate::run::emit::EventSinks;
use crate::run::state::RunState;

/// Pick the fallback reply text, if any.
///
/// Sources in strict priority: delta buffer, block buffer, assistant texts
/// joined by a blank line. The first source non-empty after trimming wins;
/// lower sources are not consulted. Region markers are stripped with
/// contents kept.
pub fn fallback_text(state: &RunState, stripper: &dyn SpanStripper) -> Option<String> {
    let raw = [state.delta_buffer.trim(), state.block_buffer.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            let joined = state.assistant_texts.join("\n\n");
            let trimmed = joined.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })?;

    let text = stripper.strip(&raw, StripOptions::MARKERS_ONLY);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Emit the fallback `assistant` event through both sinks.
///
/// Returns whether an event was emitted.
pub(crate) fn maybe_emit(state: &RunState, stripper: &dyn SpanStripper, sinks: &EventSinks) -> bool {
    let Some(text) = fallback_text(state, stripper) else {
        debug!(run_id = %state.run_id, "no fallback text");
        return false;
    };
    debug!(run_id = %state.run_id, len = text.len(), "emitting fallback assistant text");
    counter!("ember_fallback_emitted_total").increment(1);
    sinks.emit(assistant_event(&state.run_id, text));
    true
}
