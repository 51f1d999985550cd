//! Block chunker collaborator interface.
//!
//! The chunking algorithm itself (how block text is split into
//! emission-sized pieces) lives outside this crate. The run only appends
//! block text, asks whether anything is buffered, drains, and resets.

/// Options for [`BlockChunker::drain`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainOptions {
    /// Flush everything buffered, including partial or undersized chunks.
    pub force: bool,
}

impl DrainOptions {
    /// Drain only chunks the chunker considers complete.
    pub const READY: Self = Self { force: false };
    /// Drain everything.
    pub const FORCE: Self = Self { force: true };
}

/// Splits streamed block text into chunks for the block-reply sink.
pub trait BlockChunker: Send {
    /// Buffer more block text.
    fn append(&mut self, text: &str);

    /// Whether any text is buffered and not yet drained.
    fn has_buffered(&self) -> bool;

    /// Emit buffered chunks, in order, through `emit`.
    fn drain(&mut self, options: DrainOptions, emit: &mut dyn FnMut(String));

    /// Discard buffered text and return to the initial state.
    fn reset(&mut self);
}
