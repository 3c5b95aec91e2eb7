//! Line-oriented text buffer backed by ropey.
//!
//! Used for the shadow copy of every binding (the content both sides last
//! agreed on) and for the documents of the in-memory host. Line breaks are
//! `\n`, `\r\n` and lone `\r`; lines returned from this type never carry
//! their terminator.

use ropey::Rope;
use serde::Deserialize;

/// Line terminator used when joining lines back into document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    /// Detects the line ending from the first line break in `text`.
    /// Falls back to `default` when the text has no line break.
    pub fn detect(text: &str, default: LineEnding) -> LineEnding {
        match text.find('\n') {
            Some(idx) if idx > 0 && text.as_bytes()[idx - 1] == b'\r' => LineEnding::CrLf,
            Some(_) => LineEnding::Lf,
            None => default,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// A char-based span produced when replacing whole lines.
///
/// `start`/`end` are `(line, char column)` pairs in the buffer *before* the
/// replacement, `text` is what goes in their place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSpan {
    pub start: (usize, usize),
    pub end: (usize, usize),
    pub text: String,
}

/// A text buffer backed by a rope data structure.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    rope: Rope,
    line_ending: LineEnding,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TextBuffer {
    /// Buffers are equal when their lines are equal; the line ending is a
    /// presentation detail.
    fn eq(&self, other: &Self) -> bool {
        self.len_lines() == other.len_lines()
            && (0..self.len_lines()).all(|i| self.line(i) == other.line(i))
    }
}

impl Eq for TextBuffer {}

impl TextBuffer {
    /// Creates a new empty text buffer.
    pub fn new() -> Self {
        Self {
            rope: Rope::new(),
            line_ending: LineEnding::Lf,
        }
    }

    /// Creates a text buffer from a string, detecting its line ending.
    pub fn from_str(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
            line_ending: LineEnding::detect(text, LineEnding::Lf),
        }
    }

    /// Creates a text buffer from engine lines joined with `line_ending`.
    pub fn from_lines<S: AsRef<str>>(lines: &[S], line_ending: LineEnding) -> Self {
        let text = join_lines(lines, line_ending);
        Self {
            rope: Rope::from_str(&text),
            line_ending,
        }
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    pub fn set_line_ending(&mut self, line_ending: LineEnding) {
        self.line_ending = line_ending;
    }

    /// Returns the total number of characters in the buffer.
    pub fn len_chars(&self) -> usize {
        self.rope.len_chars()
    }

    /// Returns the total number of lines. An empty buffer has one line.
    pub fn len_lines(&self) -> usize {
        self.rope.len_lines()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.rope.len_chars() == 0
    }

    /// Inserts a string at the given character index.
    pub fn insert(&mut self, char_idx: usize, text: &str) {
        let idx = char_idx.min(self.len_chars());
        self.rope.insert(idx, text);
    }

    /// Removes text in the given character range.
    pub fn remove(&mut self, start: usize, end: usize) {
        let start = start.min(self.len_chars());
        let end = end.min(self.len_chars());
        if start < end {
            self.rope.remove(start..end);
        }
    }

    /// Replaces the character range `start..end` with `text`.
    pub fn replace(&mut self, start: usize, end: usize, text: &str) {
        self.remove(start, end);
        self.insert(start, text);
    }

    /// Converts a (line, column) position to a character index.
    /// The column is clamped to the line length.
    pub fn line_col_to_char(&self, line: usize, col: usize) -> usize {
        if line >= self.len_lines() {
            return self.len_chars();
        }
        let line_start = self.rope.line_to_char(line);
        line_start + col.min(self.line_len_chars(line))
    }

    /// Returns the length of a line in characters (excluding its terminator).
    pub fn line_len_chars(&self, line: usize) -> usize {
        if line >= self.len_lines() {
            return 0;
        }
        let slice = self.rope.line(line);
        let mut len = slice.len_chars();
        if len > 0 && slice.char(len - 1) == '\n' {
            len -= 1;
        }
        if len > 0 && slice.char(len - 1) == '\r' {
            len -= 1;
        }
        len
    }

    /// Returns the line at the given index without its terminator.
    pub fn line(&self, line: usize) -> Option<String> {
        if line >= self.len_lines() {
            return None;
        }
        let slice = self.rope.line(line);
        Some(slice.slice(..self.line_len_chars(line)).to_string())
    }

    /// Returns the text of a line, or an empty string past the end.
    pub fn line_or_empty(&self, line: usize) -> String {
        self.line(line).unwrap_or_default()
    }

    /// Returns all lines, the way the engine sees them.
    pub fn lines(&self) -> Vec<String> {
        (0..self.len_lines()).map(|i| self.line_or_empty(i)).collect()
    }

    /// Returns lines `start..end` (clamped).
    pub fn lines_range(&self, start: usize, end: usize) -> Vec<String> {
        let end = end.min(self.len_lines());
        let start = start.min(end);
        (start..end).map(|i| self.line_or_empty(i)).collect()
    }

    /// Computes the char span that replacing lines `start..end` with
    /// `new_lines` touches, following the trailing-line policy: the last
    /// line of the buffer has no terminator, so replacements reaching the end
    /// of the buffer join with line breaks instead of appending them.
    pub fn line_span(&self, start: usize, end: usize, new_lines: &[String]) -> LineSpan {
        let n = self.len_lines();
        let start = start.min(n);
        let end = end.clamp(start, n);
        let eol = self.line_ending.as_str();

        if end < n {
            // Interior replacement: every new line keeps its terminator.
            let text: String = new_lines.iter().map(|l| format!("{}{}", l, eol)).collect();
            return LineSpan {
                start: (start, 0),
                end: (end, 0),
                text,
            };
        }

        let last = n - 1;
        let last_end = (last, self.line_len_chars(last));
        if start < n {
            if new_lines.is_empty() && start > 0 {
                // Dropping the tail also drops the break before it.
                let prev = start - 1;
                return LineSpan {
                    start: (prev, self.line_len_chars(prev)),
                    end: last_end,
                    text: String::new(),
                };
            }
            return LineSpan {
                start: (start, 0),
                end: last_end,
                text: new_lines.join(eol),
            };
        }

        // Appending after the last line.
        let text = if new_lines.is_empty() {
            String::new()
        } else {
            format!("{}{}", eol, new_lines.join(eol))
        };
        LineSpan {
            start: last_end,
            end: last_end,
            text,
        }
    }

    /// Replaces lines `start..end` (end exclusive, clamped) with `new_lines`.
    pub fn replace_lines(&mut self, start: usize, end: usize, new_lines: &[String]) {
        let span = self.line_span(start, end, new_lines);
        let from = self.line_col_to_char(span.start.0, span.start.1);
        let to = self.line_col_to_char(span.end.0, span.end.1);
        self.replace(from, to, &span.text);
    }

    /// Returns the entire buffer as a string.
    pub fn to_string(&self) -> String {
        self.rope.to_string()
    }
}

/// Joins engine lines into document text.
pub fn join_lines<S: AsRef<str>>(lines: &[S], line_ending: LineEnding) -> String {
    let parts: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
    parts.join(line_ending.as_str())
}
