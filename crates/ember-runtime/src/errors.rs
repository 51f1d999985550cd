//! Runtime error types.

use ember_core::ids::RunId;

/// Failure delivering an item to an external sink.
///
/// Sink errors are always caught and logged by the dispatch layer; they never
/// abort lifecycle handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink reported a failure.
    #[error("sink rejected delivery: {0}")]
    Rejected(String),

    /// The sink panicked while handling a delivery.
    #[error("sink panicked: {0}")]
    Panicked(String),

    /// The bounded dispatch queue was full; the item was dropped.
    #[error("sink queue full")]
    QueueFull,

    /// The dispatch worker is gone.
    #[error("sink closed")]
    Closed,
}

impl SinkError {
    /// Error category string for logs and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Panicked(_) => "panicked",
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// Errors returned by the lifecycle dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// A signal or stream update arrived after the run's `end` was processed.
    #[error("run {run_id} already ended; rejected {operation}")]
    RunEnded {
        /// Run that already ended.
        run_id: RunId,
        /// Operation that was rejected.
        operation: &'static str,
    },
}

impl LifecycleError {
    /// Error category string for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RunEnded { .. } => "run_ended",
        }
    }
}
