//! Block formatting state and structural-marker stripping.
//!
//! Streamed reply text may carry region markers (`<think>…</think>`,
//! `<final>…</final>`). [`BlockState`] tracks which region the stream is
//! currently inside; [`SpanStripper`] removes the markers from accumulated
//! text. Markers inside inline code spans are literal text and are never
//! interpreted.

/// Inline code span tracker.
///
/// A span opens on a run of N backticks and closes on the next run of
/// exactly N backticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InlineCodeState {
    open_ticks: usize,
}

impl InlineCodeState {
    /// Fresh tracker, outside any code span.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Whether the tracker is inside a code span.
    pub fn is_open(self) -> bool {
        self.open_ticks > 0
    }

    /// Feed one run of `run` consecutive backticks.
    pub fn advance_ticks(&mut self, run: usize) {
        if self.open_ticks == 0 {
            self.open_ticks = run;
        } else if self.open_ticks == run {
            self.open_ticks = 0;
        }
    }

    /// Feed arbitrary text.
    pub fn advance(&mut self, text: &str) {
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'`' {
                let run = bytes[i..].iter().take_while(|b| **b == b'`').count();
                self.advance_ticks(run);
                i += run;
            } else {
                i += 1;
            }
        }
    }
}

/// Region a marker delimits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    /// Model reasoning.
    Thinking,
    /// Final answer.
    Final,
}

/// Which region markers the stream is currently inside.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockState {
    /// Inside a thinking region.
    pub thinking: bool,
    /// Inside a final-answer region.
    pub final_answer: bool,
    /// Inline code tracker.
    pub inline_code: InlineCodeState,
}

impl BlockState {
    /// Update region flags and the code tracker from newly streamed text.
    pub fn observe(&mut self, text: &str) {
        let mut code = self.inline_code;
        scan(text, &mut code, |token| {
            if let Token::Marker(marker) = token {
                match marker.region {
                    Region::Thinking => self.thinking = !marker.closing,
                    Region::Final => self.final_answer = !marker.closing,
                }
            }
        });
        self.inline_code = code;
    }

    /// Leave every region and reinitialize the code tracker.
    pub fn reset(&mut self) {
        self.thinking = false;
        self.final_answer = false;
        self.inline_code = InlineCodeState::initial();
    }
}

/// Which regions [`SpanStripper::strip`] removes entirely.
///
/// A region that is not removed keeps its contents; only its markers go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StripOptions {
    /// Remove thinking regions including their contents.
    pub thinking: bool,
    /// Remove final-answer regions including their contents.
    pub final_answer: bool,
}

impl StripOptions {
    /// Remove markers only; keep every region's contents.
    pub const MARKERS_ONLY: Self = Self {
        thinking: false,
        final_answer: false,
    };

    /// Remove thinking regions; keep final-answer contents. Used for text
    /// sent to the block-reply consumer.
    pub const HIDE_THINKING: Self = Self {
        thinking: true,
        final_answer: false,
    };

    fn removes(self, region: Region) -> bool {
        match region {
            Region::Thinking => self.thinking,
            Region::Final => self.final_answer,
        }
    }
}

/// Removes structural formatting markers from text.
pub trait SpanStripper: Send + Sync {
    /// Strip markers (and, per `options`, whole regions) from `text`.
    fn strip(&self, text: &str, options: StripOptions) -> String;
}

/// Default [`SpanStripper`] for `<think>`, `<thinking>`, `<thought>` and
/// `<final>` markers (ASCII case-insensitive).
///
/// An unterminated removed region is dropped through the end of the text.
#[derive(Clone, Copy, Debug, Default)]
pub struct TagStripper;

impl SpanStripper for TagStripper {
    fn strip(&self, text: &str, options: StripOptions) -> String {
        let mut out = String::with_capacity(text.len());
        let mut code = InlineCodeState::initial();
        let mut dropping: Option<Region> = None;
        scan(text, &mut code, |token| match token {
            Token::Text(s) => {
                if dropping.is_none() {
                    out.push_str(s);
                }
            }
            Token::Marker(marker) => match dropping {
                None if !marker.closing && options.removes(marker.region) => {
                    dropping = Some(marker.region);
                }
                Some(region) if marker.closing && marker.region == region => dropping = None,
                _ => {}
            },
        });
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scanner
// ─────────────────────────────────────────────────────────────────────────────

const MARKERS: &[(&str, Region, bool)] = &[
    ("<think>", Region::Thinking, false),
    ("</think>", Region::Thinking, true),
    ("<thinking>", Region::Thinking, false),
    ("</thinking>", Region::Thinking, true),
    ("<thought>", Region::Thinking, false),
    ("</thought>", Region::Thinking, true),
    ("<final>", Region::Final, false),
    ("</final>", Region::Final, true),
];

#[derive(Clone, Copy, Debug)]
struct Marker {
    region: Region,
    closing: bool,
    len: usize,
}

enum Token<'a> {
    Text(&'a str),
    Marker(Marker),
}

fn match_marker(bytes: &[u8]) -> Option<Marker> {
    MARKERS.iter().find_map(|(tag, region, closing)| {
        let tag = tag.as_bytes();
        (bytes.len() >= tag.len() && bytes[..tag.len()].eq_ignore_ascii_case(tag)).then_some(
            Marker {
                region: *region,
                closing: *closing,
                len: tag.len(),
            },
        )
    })
}

/// Split `text` into plain text and markers, skipping markers inside inline
/// code. Backticks stay in the plain text.
fn scan<'a>(text: &'a str, code: &mut InlineCodeState, mut visit: impl FnMut(Token<'a>)) {
    let bytes = text.as_bytes();
    let mut plain_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'`' => {
                let run = bytes[i..].iter().take_while(|b| **b == b'`').count();
                code.advance_ticks(run);
                i += run;
            }
            b'<' if !code.is_open() => {
                if let Some(marker) = match_marker(&bytes[i..]) {
                    if plain_start < i {
                        visit(Token::Text(&text[plain_start..i]));
                    }
                    visit(Token::Marker(marker));
                    i += marker.len;
                    plain_start = i;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    if plain_start < bytes.len() {
        visit(Token::Text(&text[plain_start..]));
    }
}
