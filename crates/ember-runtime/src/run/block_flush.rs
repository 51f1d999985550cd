//! Run-end block flush.

use ember_core::ids::RunId;
use tracing::debug;

use crate::chunker::{BlockChunker, DrainOptions};
use crate::formatting::{SpanStripper, StripOptions};
use crate::run::state::RunState;
use crate::sink::{BlockReply, SinkDispatcher};

/// Flush pending block text to the block-reply sink, then reset block
/// formatting state.
///
/// Nothing is flushed without a block-reply sink. A chunker holding text is
/// force-drained and the raw block buffer is left alone; otherwise a
/// non-empty block buffer is taken and goes out as one chunk. Thinking
/// regions are stripped from every chunk and chunks left blank are not
/// sent. Block state is reset in every case.
///
/// Returns the number of chunks sent.
pub(crate) fn flush_and_reset(
    state: &mut RunState,
    block_reply: Option<&SinkDispatcher<BlockReply>>,
    stripper: &dyn SpanStripper,
) -> usize {
    let mut sent = 0;
    if let Some(sink) = block_reply {
        if state.chunker_has_buffered() {
            if let Some(chunker) = state.block_chunker.as_mut() {
                sent = drain_into(
                    &mut **chunker,
                    DrainOptions::FORCE,
                    &state.run_id,
                    sink,
                    stripper,
                );
                chunker.reset();
            }
        } else if !state.block_buffer.is_empty() {
            let text = std::mem::take(&mut state.block_buffer);
            if send_chunk(&text, &state.run_id, sink, stripper) {
                sent = 1;
            }
        }
        debug!(run_id = %state.run_id, chunks = sent, "block flush");
    }
    state.block_state.reset();
    sent
}

/// Drain `chunker` into `sink`. Returns the number of chunks sent.
pub(crate) fn drain_into(
    chunker: &mut dyn BlockChunker,
    options: DrainOptions,
    run_id: &RunId,
    sink: &SinkDispatcher<BlockReply>,
    stripper: &dyn SpanStripper,
) -> usize {
    let mut sent = 0;
    chunker.drain(options, &mut |text| {
        if send_chunk(&text, run_id, sink, stripper) {
            sent += 1;
        }
    });
    sent
}

fn send_chunk(
    text: &str,
    run_id: &RunId,
    sink: &SinkDispatcher<BlockReply>,
    stripper: &dyn SpanStripper,
) -> bool {
    let text = stripper.strip(text, StripOptions::HIDE_THINKING);
    if text.trim().is_empty() {
        return false;
    }
    sink.dispatch(BlockReply {
        run_id: run_id.clone(),
        text,
    });
    true
}
