//! # ember-runtime
//!
//! Per-run lifecycle and compaction coordination for streaming agent runs.
//!
//! - **Dispatcher**: turns start / compaction-start / compaction-end / end signals into events
//! - **Fallback**: synthesizes exactly one final reply from whatever the buffers still hold
//! - **Compaction**: tracks in-flight passes and retries, exposes a shared wait handle
//! - **Block flush**: drains the chunker or the raw block buffer at run end
//! - **Bus / sinks**: process-wide broadcast bus and bounded, failure-isolated per-run callbacks
//!
//! Call [`init_logging`] once at startup to route `tracing` output through the
//! configured level.
//!
//! ## Crate Position
//!
//! Depends on `ember-core` and `ember-settings`.

#![deny(unsafe_code)]

pub mod bus;
pub mod chunker;
pub mod errors;
pub mod formatting;
pub mod run;
pub mod sink;

#[cfg(test)]
pub(crate) mod test_support;

pub use bus::EventBus;
pub use chunker::{BlockChunker, DrainOptions};
pub use errors::{LifecycleError, SinkError};
pub use formatting::{BlockState, InlineCodeState, SpanStripper, StripOptions, TagStripper};
pub use run::{
    CompactionOutcome, CompactionPhase, CompactionWait, LifecycleDispatcher, LifecycleSignal,
    RunBuilder, RunOptions, RunReport, RunState,
};
pub use sink::{BlockReply, Sink, SinkDispatcher, sink_fn};

/// Install the process-wide log subscriber at `logging.level` from the
/// global settings. `RUST_LOG` wins when set.
pub fn init_logging() {
    ember_core::logging::init_subscriber(&ember_settings::get_settings().logging.level);
}
