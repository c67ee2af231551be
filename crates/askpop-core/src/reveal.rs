//! Paced reveal of a finished response.
//!
//! The model answer arrives in one piece; the engine hands it to the view one
//! character per tick so it reads as if it were being generated.

use std::time::Duration;

pub const DEFAULT_REVEAL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
pub struct RevealEngine {
    target: String,
    shown: usize, // byte offset, always on a char boundary
}

impl RevealEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin revealing `text` from empty, superseding any reveal in progress
    pub fn start(&mut self, text: impl Into<String>) {
        self.target = text.into();
        self.shown = 0;
    }

    pub fn clear(&mut self) {
        self.target.clear();
        self.shown = 0;
    }

    /// Append one character. Returns the new prefix, or `None` once the whole
    /// text is visible.
    pub fn tick(&mut self) -> Option<&str> {
        let next = self.target[self.shown..].chars().next()?;
        self.shown += next.len_utf8();
        Some(&self.target[..self.shown])
    }

    /// Show the whole text immediately
    pub fn finish(&mut self) {
        self.shown = self.target.len();
    }

    pub fn visible(&self) -> &str {
        &self.target[..self.shown]
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_revealing(&self) -> bool {
        self.shown < self.target.len()
    }
}

/// The sequence of growing prefixes a reveal of `text` goes through
pub fn prefixes(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices().map(move |(i, c)| &text[..i + c.len_utf8()])
}
