//! Coordinate mapping between the host and the engine.
//!
//! The host addresses a line by UTF-16 code units, grapheme clusters or
//! chars depending on the host; the engine always addresses it by bytes.
//! Both sides use 0-indexed lines. This is the only place positions cross
//! from one space to the other.

use serde::Deserialize;
use unicode_segmentation::UnicodeSegmentation;

/// Position in host coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct HostPosition {
    pub line: usize,
    /// Column in host units (see [`HostUnit`]).
    pub character: usize,
}

impl HostPosition {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// Position in engine coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct EnginePosition {
    pub line: usize,
    /// Byte offset into the UTF-8 line.
    pub byte: usize,
}

impl EnginePosition {
    pub fn new(line: usize, byte: usize) -> Self {
        Self { line, byte }
    }
}

/// The unit the host counts columns in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostUnit {
    /// UTF-16 code units (LSP-style hosts).
    #[default]
    Utf16,
    /// Extended grapheme clusters.
    Grapheme,
    /// Unicode scalar values.
    Char,
}

/// One addressable step through a line: its width in host units, in bytes
/// and in chars.
#[derive(Debug, Clone, Copy)]
struct Step {
    host: usize,
    bytes: usize,
    chars: usize,
}

/// Converts positions between host and engine space.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateMapper {
    unit: HostUnit,
}

impl CoordinateMapper {
    pub fn new(unit: HostUnit) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> HostUnit {
        self.unit
    }

    /// Maps a host position to the engine's byte position on the same line.
    pub fn to_engine(&self, pos: HostPosition, line_text: &str) -> EnginePosition {
        let (offsets, _) = self.walk(line_text, pos.character, |s| s.host, |s| s.bytes);
        EnginePosition::new(pos.line, offsets)
    }

    /// Maps an engine byte position to the host's position on the same line.
    pub fn to_host(&self, pos: EnginePosition, line_text: &str) -> HostPosition {
        let (offsets, _) = self.walk(line_text, pos.byte, |s| s.bytes, |s| s.host);
        HostPosition::new(pos.line, offsets)
    }

    /// Converts a host column into a char index within the line.
    pub fn host_to_char(&self, column: usize, line_text: &str) -> usize {
        self.walk(line_text, column, |s| s.host, |s| s.chars).0
    }

    /// Converts a char index within the line into a host column.
    pub fn char_to_host(&self, char_col: usize, line_text: &str) -> usize {
        self.walk(line_text, char_col, |s| s.chars, |s| s.host).0
    }

    /// Converts an engine byte column into a char index within the line.
    pub fn byte_to_char(&self, byte: usize, line_text: &str) -> usize {
        self.walk(line_text, byte, |s| s.bytes, |s| s.chars).0
    }

    /// Length of a line in host units.
    pub fn host_len(&self, line_text: &str) -> usize {
        self.steps(line_text).map(|s| s.host).sum()
    }

    fn steps<'a>(&self, line_text: &'a str) -> Box<dyn Iterator<Item = Step> + 'a> {
        match self.unit {
            HostUnit::Utf16 => Box::new(line_text.chars().map(|c| Step {
                host: c.len_utf16(),
                bytes: c.len_utf8(),
                chars: 1,
            })),
            HostUnit::Char => Box::new(line_text.chars().map(|c| Step {
                host: 1,
                bytes: c.len_utf8(),
                chars: 1,
            })),
            HostUnit::Grapheme => Box::new(line_text.graphemes(true).map(|g| Step {
                host: 1,
                bytes: g.len(),
                chars: g.chars().count(),
            })),
        }
    }

    /// Walks the line accumulating `from` widths until `target` is reached,
    /// returning the matching offset measured with `to` and whether the
    /// target had to be clamped.
    ///
    /// A target inside a step snaps to the nearer step boundary, ties go to
    /// the earlier one. A target past the end clamps to the line length.
    fn walk(
        &self,
        line_text: &str,
        target: usize,
        from: impl Fn(&Step) -> usize,
        to: impl Fn(&Step) -> usize,
    ) -> (usize, bool) {
        let mut acc_from = 0;
        let mut acc_to = 0;
        for step in self.steps(line_text) {
            if acc_from == target {
                return (acc_to, false);
            }
            let next_from = acc_from + from(&step);
            if next_from > target {
                let snapped = if target - acc_from <= next_from - target {
                    acc_to
                } else {
                    acc_to + to(&step)
                };
                log::trace!(
                    "Clamped column {} inside a {}-unit step of {:?}",
                    target,
                    from(&step),
                    line_text
                );
                return (snapped, true);
            }
            acc_from = next_from;
            acc_to += to(&step);
        }
        if target > acc_from {
            log::trace!("Clamped column {} to line length {}", target, acc_from);
            return (acc_to, true);
        }
        (acc_to, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNITS: [HostUnit; 3] = [HostUnit::Utf16, HostUnit::Grapheme, HostUnit::Char];

    #[test]
    fn test_ascii_is_identity() {
        let mapper = CoordinateMapper::new(HostUnit::Utf16);
        let host = mapper.to_host(EnginePosition::new(0, 4), "hello world");
        assert_eq!(host, HostPosition::new(0, 4));
        assert_eq!(mapper.to_engine(host, "hello world"), EnginePosition::new(0, 4));
    }

    #[test]
    fn test_utf16_multibyte() {
        let mapper = CoordinateMapper::new(HostUnit::Utf16);
        // 'é' is 2 bytes / 1 unit, '😀' is 4 bytes / 2 units.
        let line = "é😀x";
        assert_eq!(mapper.to_engine(HostPosition::new(3, 1), line), EnginePosition::new(3, 2));
        assert_eq!(mapper.to_engine(HostPosition::new(3, 3), line), EnginePosition::new(3, 6));
        assert_eq!(mapper.to_host(EnginePosition::new(3, 6), line), HostPosition::new(3, 3));
        assert_eq!(mapper.to_host(EnginePosition::new(3, 7), line), HostPosition::new(3, 4));
    }

    #[test]
    fn test_target_inside_code_point_snaps_to_nearest() {
        let mapper = CoordinateMapper::new(HostUnit::Utf16);
        let line = "a😀b";
        // Byte 2 is 1 byte into a 4-byte char: snaps back to its start.
        assert_eq!(mapper.to_host(EnginePosition::new(0, 2), line).character, 1);
        // Byte 4 is 3 bytes in: snaps forward past it.
        assert_eq!(mapper.to_host(EnginePosition::new(0, 4), line).character, 3);
        // Byte 3 is the midpoint: ties go to the earlier boundary.
        assert_eq!(mapper.to_host(EnginePosition::new(0, 3), line).character, 1);
        // UTF-16 column 2 sits between the surrogates of the emoji.
        assert_eq!(mapper.to_engine(HostPosition::new(0, 2), line).byte, 1);
    }

    #[test]
    fn test_out_of_range_clamps_to_line_length() {
        let mapper = CoordinateMapper::new(HostUnit::Utf16);
        assert_eq!(mapper.to_engine(HostPosition::new(0, 50), "abc").byte, 3);
        assert_eq!(mapper.to_host(EnginePosition::new(0, 50), "ab€").character, 3);
        assert_eq!(mapper.to_host(EnginePosition::new(0, 3), "").character, 0);
    }

    #[test]
    fn test_grapheme_units() {
        let mapper = CoordinateMapper::new(HostUnit::Grapheme);
        // "e" + combining acute accent is one cluster of 3 bytes.
        let line = "e\u{301}x";
        assert_eq!(mapper.to_engine(HostPosition::new(0, 1), line).byte, 3);
        assert_eq!(mapper.to_host(EnginePosition::new(0, 3), line).character, 1);
        assert_eq!(mapper.host_to_char(1, line), 2);
        assert_eq!(mapper.host_len(line), 2);
    }

    #[test]
    fn test_round_trip_on_boundaries() {
        let lines = ["", "plain ascii", "héllo wörld", "a😀b😀c", "e\u{301}e\u{301}!", "日本語テキスト"];
        for unit in UNITS {
            let mapper = CoordinateMapper::new(unit);
            for line in lines {
                // Only columns that start a char; surrogate midpoints snap.
                for char_col in 0..=line.chars().count() {
                    let pos = HostPosition::new(2, mapper.char_to_host(char_col, line));
                    let back = mapper.to_host(mapper.to_engine(pos, line), line);
                    assert_eq!(back, pos, "unit {:?} line {:?}", unit, line);
                }
            }
        }
    }

    #[test]
    fn test_char_conversions() {
        let mapper = CoordinateMapper::new(HostUnit::Utf16);
        let line = "x😀y";
        assert_eq!(mapper.host_to_char(3, line), 2);
        assert_eq!(mapper.char_to_host(2, line), 3);
        assert_eq!(mapper.byte_to_char(5, line), 2);
    }
}
