//! A fixed-size scrollback for the display's free-text widget.

use crate::protocol::escape_text;

use std::collections::VecDeque;

/// Lines kept by default.
pub const MAX_LINES: usize = 9;

/// Characters per line by default.
pub const MAX_CHARS_PER_LINE: usize = 32;

/// Keeps the most recent `max_lines` lines of at most `max_chars` characters.
/// Longer messages are wrapped before they are stored; the oldest lines are
/// evicted first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
    max_chars: usize,
    line_break: String,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(MAX_LINES, MAX_CHARS_PER_LINE, "\\r")
    }
}

impl LogBuffer {
    /// An empty buffer. Limits of zero are raised to one.
    pub fn new(max_lines: usize, max_chars: usize, line_break: &str) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines.max(1)),
            max_lines: max_lines.max(1),
            max_chars: max_chars.max(1),
            line_break: line_break.to_owned(),
        }
    }

    /// Wrap `message` and append it, returning the rendered buffer.
    pub fn append(&mut self, message: &str) -> String {
        for line in wrap(message, self.max_chars) {
            self.lines.push_back(line);
        }
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
        self.render()
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// The buffer joined with the display's line-break token.
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(self.line_break.as_str())
    }

    /// [`LogBuffer::render`] with every line escaped for a `.txt`
    /// assignment. The line-break token goes in after escaping, so the display
    /// still reads it as a break.
    pub fn render_escaped(&self) -> String {
        self.lines
            .iter()
            .map(|line| escape_text(line))
            .collect::<Vec<_>>()
            .join(self.line_break.as_str())
    }

    /// The stored lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Number of stored lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether no line is stored.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Split on newlines, then cut each piece into `width`-character lines.
/// Counts characters, not bytes, so multi-byte text is never split inside a
/// code point.
fn wrap(message: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    for piece in message.lines() {
        let chars: Vec<char> = piece.chars().collect();
        if chars.is_empty() {
            out.push(String::new());
            continue;
        }
        out.extend(chars.chunks(width).map(|c| c.iter().collect::<String>()));
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}
