//! UI-agnostic session state types
//!
//! These are the values the popup controller owns and exposes to whatever
//! front end renders it. None of them depend on a UI framework.

use chrono::{DateTime, Local};

use crate::attachment::EncodedImage;

/// One completed interaction, kept in the session history
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: u64,
    pub prompt: String,
    pub image: Option<EncodedImage>,
    pub response: String,
    pub timestamp: DateTime<Local>,
}

/// Screen offset of the popup, in terminal cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// Lifecycle of the most recent submission
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    InFlight { ticket: u64 },
    Cancelled { ticket: u64 },
    Completed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMove {
    Left,
    Right,
    Home,
    End,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// The uncommitted prompt text and attachment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub prompt: String,
    pub image: Option<EncodedImage>,
    cursor: usize, // char index into prompt
}

impl Draft {
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the prompt has anything besides whitespace
    pub fn is_submittable(&self) -> bool {
        !self.prompt.trim().is_empty()
    }

    /// Replace the prompt, leaving the cursor at the end
    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
        self.cursor = self.prompt.chars().count();
    }

    pub fn clear(&mut self) {
        self.prompt.clear();
        self.image = None;
        self.cursor = 0;
    }

    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.prompt, self.cursor);
        self.prompt.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn insert_str(&mut self, text: &str) {
        let byte_pos = char_to_byte_index(&self.prompt, self.cursor);
        self.prompt.insert_str(byte_pos, text);
        self.cursor += text.chars().count();
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.prompt, self.cursor);
            self.prompt.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        let char_count = self.prompt.chars().count();
        if self.cursor < char_count {
            let byte_pos = char_to_byte_index(&self.prompt, self.cursor);
            self.prompt.remove(byte_pos);
        }
    }

    pub fn move_cursor(&mut self, movement: CursorMove) {
        let char_count = self.prompt.chars().count();
        self.cursor = match movement {
            CursorMove::Left => self.cursor.saturating_sub(1),
            CursorMove::Right => (self.cursor + 1).min(char_count),
            CursorMove::Home => 0,
            CursorMove::End => char_count,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_backspace_multibyte() {
        let mut draft = Draft::default();
        for c in "héllo".chars() {
            draft.insert_char(c);
        }
        assert_eq!(draft.prompt, "héllo");
        assert_eq!(draft.cursor(), 5);

        draft.move_cursor(CursorMove::Left);
        draft.move_cursor(CursorMove::Left);
        draft.move_cursor(CursorMove::Left);
        draft.backspace();
        assert_eq!(draft.prompt, "hllo");
        assert_eq!(draft.cursor(), 1);
    }

    #[test]
    fn test_delete_at_end_is_noop() {
        let mut draft = Draft::default();
        draft.set_prompt("abc");
        draft.delete();
        assert_eq!(draft.prompt, "abc");

        draft.move_cursor(CursorMove::Home);
        draft.delete();
        assert_eq!(draft.prompt, "bc");
    }

    #[test]
    fn test_insert_str_mid_prompt() {
        let mut draft = Draft::default();
        draft.set_prompt("ad");
        draft.move_cursor(CursorMove::Left);
        draft.insert_str("bc");
        assert_eq!(draft.prompt, "abcd");
        assert_eq!(draft.cursor(), 3);
    }

    #[test]
    fn test_whitespace_prompt_not_submittable() {
        let mut draft = Draft::default();
        assert!(!draft.is_submittable());
        draft.set_prompt(" \n\t ");
        assert!(!draft.is_submittable());
        draft.set_prompt(" hi ");
        assert!(draft.is_submittable());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut draft = Draft::default();
        draft.set_prompt("hello");
        draft.image = Some(EncodedImage::from_data_url("data:image/png;base64,AAAA"));
        draft.clear();
        assert_eq!(draft, Draft::default());
    }
}
