//! One agent run: state, the run-end helpers, and the dispatcher that drives
//! them.

pub mod block_flush;
pub mod compaction;
pub mod dispatcher;
pub(crate) mod emit;
pub mod fallback;
pub mod state;

pub use compaction::{CompactionCoordinator, CompactionOutcome, CompactionPhase, CompactionWait};
pub use dispatcher::{LifecycleDispatcher, LifecycleSignal, RunBuilder, RunOptions, RunReport};
pub use fallback::fallback_text;
pub use state::{AttemptBaseline, RunState};
