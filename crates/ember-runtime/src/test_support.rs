//! Test doubles shared by the runtime's unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::chunker::{BlockChunker, DrainOptions};
use crate::errors::SinkError;
use crate::sink::Sink;

/// Sink that records every delivered item.
pub struct RecordingSink<T> {
    name: String,
    items: Mutex<Vec<T>>,
}

impl<T: Clone + Send + 'static> RecordingSink<T> {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            items: Mutex::new(Vec::new()),
        })
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Sink<T> for RecordingSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, item: T) -> Result<(), SinkError> {
        self.items.lock().push(item);
        Ok(())
    }
}

/// Sink that rejects everything.
pub struct RejectingSink;

#[async_trait]
impl<T: Send + 'static> Sink<T> for RejectingSink {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn deliver(&self, _item: T) -> Result<(), SinkError> {
        Err(SinkError::Rejected("consumer unavailable".into()))
    }
}

/// Calls observed on a [`ScriptedChunker`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkerCall {
    Append(String),
    HasBuffered,
    Drain { force: bool },
    Reset,
}

/// Chunker that splits on blank lines and records every call.
///
/// Non-forced drains only release complete paragraphs; forced drains release
/// everything.
#[derive(Clone, Default)]
pub struct ScriptedChunker {
    buffer: Arc<Mutex<String>>,
    calls: Arc<Mutex<Vec<ChunkerCall>>>,
}

impl ScriptedChunker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffered(text: &str) -> Self {
        let chunker = Self::new();
        chunker.buffer.lock().push_str(text);
        chunker
    }

    pub fn calls(&self) -> Vec<ChunkerCall> {
        self.calls.lock().clone()
    }
}

impl BlockChunker for ScriptedChunker {
    fn append(&mut self, text: &str) {
        self.calls.lock().push(ChunkerCall::Append(text.to_string()));
        self.buffer.lock().push_str(text);
    }

    fn has_buffered(&self) -> bool {
        self.calls.lock().push(ChunkerCall::HasBuffered);
        !self.buffer.lock().is_empty()
    }

    fn drain(&mut self, options: DrainOptions, emit: &mut dyn FnMut(String)) {
        self.calls.lock().push(ChunkerCall::Drain {
            force: options.force,
        });
        let mut buffer = self.buffer.lock();
        if options.force {
            let rest = std::mem::take(&mut *buffer);
            if !rest.is_empty() {
                emit(rest);
            }
            return;
        }
        while let Some(idx) = buffer.find("\n\n") {
            let paragraph: String = buffer.drain(..idx + 2).collect();
            emit(paragraph.trim_end().to_string());
        }
    }

    fn reset(&mut self) {
        self.calls.lock().push(ChunkerCall::Reset);
        self.buffer.lock().clear();
    }
}
