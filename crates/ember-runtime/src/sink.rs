//! Per-run external sinks and their bounded, failure-isolating dispatch.
//!
//! A [`Sink`] is an external consumer (the per-run agent-event callback, the
//! block-reply callback). The run never calls a sink directly: items go
//! through a [`SinkDispatcher`], which queues them on a bounded channel and
//! delivers them from a single worker task. Delivery errors and panics are
//! caught and logged there, so a misbehaving consumer cannot interrupt
//! lifecycle handling. Order is preserved per sink.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ember_core::ids::RunId;
use futures::FutureExt;
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::errors::SinkError;

/// Default bound of a sink queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A block of reply text delivered to the block-reply sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockReply {
    /// Run the block belongs to.
    pub run_id: RunId,
    /// Block text.
    pub text: String,
}

/// External consumer of items of type `T`.
#[async_trait]
pub trait Sink<T: Send + 'static>: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Deliver one item.
    ///
    /// Errors are logged by the dispatcher and otherwise ignored.
    async fn deliver(&self, item: T) -> Result<(), SinkError>;
}

/// [`Sink`] backed by an async closure.
pub struct FnSink<T, F> {
    name: String,
    f: F,
    _item: PhantomData<fn(T)>,
}

/// Wrap an async closure as a shared sink.
pub fn sink_fn<T, F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Sink<T>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SinkError>> + Send + 'static,
{
    Arc::new(FnSink {
        name: name.into(),
        f,
        _item: PhantomData,
    })
}

#[async_trait]
impl<T, F, Fut> Sink<T> for FnSink<T, F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SinkError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, item: T) -> Result<(), SinkError> {
        (self.f)(item).await
    }
}

enum Envelope<T> {
    Item(T),
    Flush(oneshot::Sender<()>),
}

/// Bounded, fire-and-forget dispatch to one sink.
///
/// Must be created inside a tokio runtime: construction spawns the worker.
/// Dropping the dispatcher lets the worker deliver what is already queued
/// and then exit.
pub struct SinkDispatcher<T: Send + 'static> {
    name: Arc<str>,
    tx: mpsc::Sender<Envelope<T>>,
    dropped: AtomicU64,
}

impl<T: Send + 'static> SinkDispatcher<T> {
    /// Spawn a worker delivering to `sink` through a queue of `capacity`.
    pub fn spawn(sink: Arc<dyn Sink<T>>, capacity: usize) -> Self {
        let name: Arc<str> = Arc::from(sink.name());
        let (tx, rx) = mpsc::channel(capacity.max(1));
        drop(tokio::spawn(sink_worker(rx, sink, Arc::clone(&name))));
        Self {
            name,
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Sink name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an item without waiting. A full or closed queue drops the item
    /// with a warning.
    pub fn dispatch(&self, item: T) {
        let err = match self.tx.try_send(Envelope::Item(item)) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(_)) => SinkError::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SinkError::Closed,
        };
        let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        record_failure(&self.name, &err);
    }

    /// Wait until every item queued before this call has been handled.
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(reply_tx)).await.is_err() {
            debug!(sink = %self.name, "flush on closed sink");
            return;
        }
        let _ = reply_rx.await;
    }

    /// Number of items dropped because the queue was full or closed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Send + 'static> std::fmt::Debug for SinkDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkDispatcher")
            .field("name", &self.name)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

async fn sink_worker<T: Send + 'static>(
    mut rx: mpsc::Receiver<Envelope<T>>,
    sink: Arc<dyn Sink<T>>,
    name: Arc<str>,
) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Item(item) => {
                let delivery = AssertUnwindSafe(sink.deliver(item)).catch_unwind().await;
                match delivery {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => record_failure(&name, &e),
                    Err(panic) => record_failure(&name, &SinkError::Panicked(panic_message(&*panic))),
                }
            }
            Envelope::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!(sink = %name, "sink worker exiting");
}

fn record_failure(name: &str, err: &SinkError) {
    counter!("ember_sink_failures_total", "sink" => name.to_string(), "kind" => err.category())
        .increment(1);
    warn!(sink = %name, error = %err, "sink delivery failed");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
