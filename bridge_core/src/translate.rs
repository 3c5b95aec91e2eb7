//! Buffer change translation.
//!
//! Host changes are character ranges in host units; engine changes are
//! whole-line replacements. This module converts in both directions and
//! owns the line policy: a document's text is its lines joined by line
//! breaks, so a trailing line break is a final empty line.

use crate::buffer::TextBuffer;
use crate::engine::{BufferLinesEvent, EngineEdit};
use crate::host::{HostChange, HostEdit, HostRange};
use crate::mapper::{CoordinateMapper, HostPosition};
use thiserror::Error;

/// Why a host change could not be translated incrementally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("change touches line {line} but the document has {line_count} lines")]
    OutOfRange { line: usize, line_count: usize },
}

/// The result of translating a host change event.
#[derive(Debug, Clone)]
pub struct Translation {
    /// Engine edits, in the order they must be applied.
    pub edits: Vec<EngineEdit>,
    /// Document content after the change.
    pub after: TextBuffer,
}

/// A host change resolved to char offsets in the pre-event document.
#[derive(Debug, Clone)]
struct ResolvedChange {
    start_line: usize,
    end_line: usize,
    start_char: usize,
    end_char: usize,
    text: String,
}

/// Translates a host change event into engine edits.
///
/// Ranged changes reported bottom-up are grouped by the lines they touch;
/// groups on the same or adjacent lines merge into one edit, and edits are
/// emitted bottom-up so each stays valid after the ones before it have been
/// applied. Anything else (full-document changes, changes in arbitrary
/// order) is applied sequentially and sent as a single-hunk line diff.
pub fn translate_host_changes(
    before: &TextBuffer,
    changes: &[HostChange],
    mapper: &CoordinateMapper,
) -> Result<Translation, TranslateError> {
    let resolved = match resolve_bottom_up(before, changes, mapper) {
        Some(resolved) => resolved,
        None => {
            let mut after = before.clone();
            apply_host_changes(&mut after, changes, mapper)?;
            let edits = diff_lines(before, &after).into_iter().collect();
            return Ok(Translation { edits, after });
        }
    };

    let mut working = before.clone();
    let mut edits = Vec::new();
    let mut index = 0;
    while index < resolved.len() {
        // Grow the group upwards while the next change touches it.
        let group_end_line = resolved[index].end_line;
        let mut group_start_line = resolved[index].start_line;
        let mut next = index + 1;
        while next < resolved.len() && resolved[next].end_line + 1 >= group_start_line {
            group_start_line = group_start_line.min(resolved[next].start_line);
            next += 1;
        }

        let lines_before = working.len_lines();
        for change in &resolved[index..next] {
            working.replace(change.start_char, change.end_char, &change.text);
        }
        let new_end_line = (group_end_line + working.len_lines()) as isize - lines_before as isize;
        let new_end_line = new_end_line.max(group_start_line as isize) as usize;
        let lines = working.lines_range(group_start_line, new_end_line + 1);

        edits.push(EngineEdit::new(group_start_line, group_end_line + 1, lines));
        index = next;
    }

    Ok(Translation {
        edits,
        after: working,
    })
}

/// Resolves ranged changes against `before`. Returns `None` when the event
/// is not a bottom-up sequence of non-overlapping ranged changes that all
/// fit the pre-event document.
fn resolve_bottom_up(
    before: &TextBuffer,
    changes: &[HostChange],
    mapper: &CoordinateMapper,
) -> Option<Vec<ResolvedChange>> {
    let mut resolved: Vec<ResolvedChange> = Vec::with_capacity(changes.len());
    for change in changes {
        let range = change.range?;
        let (start_char, end_char) = resolve_range(before, &range, mapper).ok()?;
        if start_char > end_char {
            return None;
        }
        if let Some(prev) = resolved.last() {
            if end_char > prev.start_char {
                return None;
            }
        }
        resolved.push(ResolvedChange {
            start_line: range.start.line,
            end_line: range.end.line,
            start_char,
            end_char,
            text: change.text.clone(),
        });
    }
    Some(resolved)
}

/// Converts a host range to char offsets in `buffer`.
fn resolve_range(
    buffer: &TextBuffer,
    range: &HostRange,
    mapper: &CoordinateMapper,
) -> Result<(usize, usize), TranslateError> {
    Ok((
        resolve_position(buffer, range.start, mapper)?,
        resolve_position(buffer, range.end, mapper)?,
    ))
}

fn resolve_position(
    buffer: &TextBuffer,
    pos: HostPosition,
    mapper: &CoordinateMapper,
) -> Result<usize, TranslateError> {
    let line_count = buffer.len_lines();
    if pos.line >= line_count {
        return Err(TranslateError::OutOfRange {
            line: pos.line,
            line_count,
        });
    }
    let text = buffer.line_or_empty(pos.line);
    let col = mapper.host_to_char(pos.character, &text);
    Ok(buffer.line_col_to_char(pos.line, col))
}

/// Applies host changes to `buffer` in order, each against the result of
/// the previous one.
pub fn apply_host_changes(
    buffer: &mut TextBuffer,
    changes: &[HostChange],
    mapper: &CoordinateMapper,
) -> Result<(), TranslateError> {
    for change in changes {
        match change.range {
            Some(range) => {
                let (start, end) = resolve_range(buffer, &range, mapper)?;
                let (start, end) = (start.min(end), start.max(end));
                buffer.replace(start, end, &change.text);
            }
            None => {
                let line_ending = buffer.line_ending();
                *buffer = TextBuffer::from_str(&change.text);
                if !change.text.contains('\n') {
                    buffer.set_line_ending(line_ending);
                }
            }
        }
    }
    Ok(())
}

/// Computes the single line replacement turning `before` into `after`, by
/// trimming their common leading and trailing lines. `None` if the contents
/// are identical.
pub fn diff_lines(before: &TextBuffer, after: &TextBuffer) -> Option<EngineEdit> {
    let old = before.lines();
    let new = after.lines();
    if old == new {
        return None;
    }

    let max_common = old.len().min(new.len());
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_common - prefix)
        .take_while(|(a, b)| a == b)
        .count();

    Some(EngineEdit::new(
        prefix,
        old.len() - suffix,
        new[prefix..new.len() - suffix].to_vec(),
    ))
}

/// Translates one engine line replacement into the host edit that performs
/// it on a document whose content is `before`.
pub fn translate_engine_edit(
    before: &TextBuffer,
    edit: &EngineEdit,
    mapper: &CoordinateMapper,
) -> HostEdit {
    let span = before.line_span(edit.start_line, edit.end_line, &edit.lines);
    let to_host = |(line, col): (usize, usize)| {
        let text = before.line_or_empty(line);
        HostPosition::new(line, mapper.char_to_host(col, &text))
    };
    HostEdit::new(HostRange::new(to_host(span.start), to_host(span.end)), span.text)
}

/// Translates an engine buffer update into host edits against `before`.
pub fn translate_engine_lines(
    before: &TextBuffer,
    event: &BufferLinesEvent,
    mapper: &CoordinateMapper,
) -> Vec<HostEdit> {
    let edit = event.to_edit(before.len_lines());
    vec![translate_engine_edit(before, &edit, mapper)]
}

/// Builds the whole-buffer replacement of `before` by `lines`, as the
/// engine edit and the host edit that perform it.
pub fn full_replace(
    before: &TextBuffer,
    lines: Vec<String>,
    mapper: &CoordinateMapper,
) -> (EngineEdit, HostEdit) {
    let edit = EngineEdit::replace_all(before.len_lines(), lines);
    let host_edit = translate_engine_edit(before, &edit, mapper);
    (edit, host_edit)
}

/// Applies engine edits to `buffer` in order.
pub fn apply_engine_edits(buffer: &mut TextBuffer, edits: &[EngineEdit]) {
    for edit in edits {
        buffer.replace_lines(edit.start_line, edit.end_line, &edit.lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::HostUnit;

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new(HostUnit::Utf16)
    }

    fn range(sl: usize, sc: usize, el: usize, ec: usize) -> HostRange {
        HostRange::new(HostPosition::new(sl, sc), HostPosition::new(el, ec))
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Translates `changes` against `text` and checks that replaying the
    /// engine edits on the old content yields the new content.
    fn assert_round_trip(text: &str, changes: &[HostChange]) -> Translation {
        let before = TextBuffer::from_str(text);
        let translation = translate_host_changes(&before, changes, &mapper()).unwrap();

        let mut expected = before.clone();
        apply_host_changes(&mut expected, changes, &mapper()).unwrap();
        assert_eq!(translation.after, expected);

        let mut engine = before.clone();
        apply_engine_edits(&mut engine, &translation.edits);
        assert_eq!(engine.lines(), expected.lines(), "edits: {:?}", translation.edits);
        translation
    }

    #[test]
    fn test_replace_inside_line() {
        let translation = assert_round_trip("abc", &[HostChange::replace(range(0, 1, 0, 2), "XY")]);
        assert_eq!(translation.edits, vec![EngineEdit::new(0, 1, lines(&["aXYc"]))]);
        assert_eq!(translation.after.line(0).as_deref(), Some("aXYc"));
    }

    #[test]
    fn test_insert_newline_splits_line() {
        let translation = assert_round_trip("hello world", &[HostChange::replace(range(0, 5, 0, 6), "\n")]);
        assert_eq!(translation.edits, vec![EngineEdit::new(0, 1, lines(&["hello", "world"]))]);
    }

    #[test]
    fn test_join_lines() {
        let translation = assert_round_trip("one\ntwo\nthree", &[HostChange::replace(range(0, 3, 1, 0), " ")]);
        assert_eq!(translation.edits, vec![EngineEdit::new(0, 2, lines(&["one two"]))]);
    }

    #[test]
    fn test_adjacent_changes_merge() {
        // Bottom-up multi-cursor edit on lines 2 and 1.
        let translation = assert_round_trip(
            "a\nb\nc\nd",
            &[
                HostChange::replace(range(2, 1, 2, 1), "!"),
                HostChange::replace(range(1, 1, 1, 1), "!"),
            ],
        );
        assert_eq!(translation.edits, vec![EngineEdit::new(1, 3, lines(&["b!", "c!"]))]);
    }

    #[test]
    fn test_distant_changes_emit_bottom_up() {
        let translation = assert_round_trip(
            "a\nb\nc\nd\ne",
            &[
                HostChange::replace(range(4, 0, 4, 1), "E\nE2"),
                HostChange::replace(range(0, 0, 0, 1), "A"),
            ],
        );
        assert_eq!(
            translation.edits,
            vec![
                EngineEdit::new(4, 5, lines(&["E", "E2"])),
                EngineEdit::new(0, 1, lines(&["A"])),
            ]
        );
    }

    #[test]
    fn test_same_line_changes_merge() {
        let translation = assert_round_trip(
            "foo bar baz",
            &[
                HostChange::replace(range(0, 8, 0, 11), "qux"),
                HostChange::replace(range(0, 0, 0, 3), "FOO"),
            ],
        );
        assert_eq!(translation.edits, vec![EngineEdit::new(0, 1, lines(&["FOO bar qux"]))]);
    }

    #[test]
    fn test_top_down_changes_use_line_diff() {
        // Sequential semantics: the second range is relative to the first
        // change's result.
        let translation = assert_round_trip(
            "a\nb\nc",
            &[
                HostChange::replace(range(0, 0, 0, 0), "x\n"),
                HostChange::replace(range(3, 0, 3, 1), "C"),
            ],
        );
        assert_eq!(translation.after.lines(), lines(&["x", "a", "b", "C"]));
        assert_eq!(translation.edits.len(), 1);
    }

    #[test]
    fn test_full_document_change() {
        let translation = assert_round_trip("a\nb\nc\nd", &[HostChange::full("a\nB\nc\nd")]);
        assert_eq!(translation.edits, vec![EngineEdit::new(1, 2, lines(&["B"]))]);
    }

    #[test]
    fn test_full_document_change_without_difference() {
        let translation = assert_round_trip("same", &[HostChange::full("same")]);
        assert!(translation.edits.is_empty());
    }

    #[test]
    fn test_trailing_newline_counts_as_content() {
        let translation = assert_round_trip("a", &[HostChange::replace(range(0, 1, 0, 1), "\n")]);
        assert_eq!(translation.edits, vec![EngineEdit::new(0, 1, lines(&["a", ""]))]);
    }

    #[test]
    fn test_delete_everything() {
        assert_round_trip("a\nb\nc", &[HostChange::replace(range(0, 0, 2, 1), "")]);
    }

    #[test]
    fn test_multibyte_columns() {
        let translation = assert_round_trip("😀a😀", &[HostChange::replace(range(0, 2, 0, 3), "b")]);
        assert_eq!(translation.edits, vec![EngineEdit::new(0, 1, lines(&["😀b😀"]))]);
    }

    #[test]
    fn test_crlf_document() {
        let translation = assert_round_trip("a\r\nb\r\nc", &[HostChange::replace(range(1, 1, 1, 1), "\r\nnew")]);
        assert_eq!(translation.edits, vec![EngineEdit::new(1, 2, lines(&["b", "new"]))]);
        assert_eq!(translation.after.to_string(), "a\r\nb\r\nnew\r\nc");
    }

    #[test]
    fn test_out_of_range_is_reported() {
        let before = TextBuffer::from_str("one line");
        let result = translate_host_changes(
            &before,
            &[HostChange::replace(range(3, 0, 3, 0), "x")],
            &mapper(),
        );
        assert_eq!(
            result.unwrap_err(),
            TranslateError::OutOfRange {
                line: 3,
                line_count: 1
            }
        );
    }

    #[test]
    fn test_round_trip_many_pairs() {
        let texts = ["", "x", "a\nb", "a\nb\n", "\n\n", "one\ntwo\nthree\n", "αβγ\nδ"];
        for old in texts {
            for new in texts {
                let before = TextBuffer::from_str(old);
                let translation =
                    translate_host_changes(&before, &[HostChange::full(new)], &mapper()).unwrap();
                let mut engine = before.clone();
                apply_engine_edits(&mut engine, &translation.edits);
                assert_eq!(engine, TextBuffer::from_str(new), "{:?} -> {:?}", old, new);
            }
        }
    }

    #[test]
    fn test_engine_edit_to_host_interior() {
        let before = TextBuffer::from_str("a\nb\nc");
        let edit = translate_engine_edit(&before, &EngineEdit::new(1, 2, lines(&["B"])), &mapper());
        assert_eq!(edit, HostEdit::new(range(1, 0, 2, 0), "B\n"));
    }

    #[test]
    fn test_engine_edit_to_host_tail_delete() {
        let before = TextBuffer::from_str("a\nb\nc");
        let edit = translate_engine_edit(&before, &EngineEdit::new(1, 3, vec![]), &mapper());
        assert_eq!(edit, HostEdit::new(range(0, 1, 2, 1), ""));
    }

    #[test]
    fn test_engine_edit_to_host_append() {
        let before = TextBuffer::from_str("a😀");
        let edit = translate_engine_edit(&before, &EngineEdit::new(1, 1, lines(&["b"])), &mapper());
        assert_eq!(edit, HostEdit::new(range(0, 3, 0, 3), "\nb"));
    }

    #[test]
    fn test_engine_edits_round_trip_through_host() {
        let before = TextBuffer::from_str("first\nsecond\nthird");
        let edits = [
            EngineEdit::new(0, 1, lines(&["FIRST", "inserted"])),
            EngineEdit::new(3, 4, vec![]),
            EngineEdit::new(3, 3, lines(&["tail"])),
        ];
        let mut host = before.clone();
        let mut engine = before.clone();
        for edit in &edits {
            let host_edit = translate_engine_edit(&host, edit, &mapper());
            apply_host_changes(&mut host, &[host_edit.into()], &mapper()).unwrap();
            apply_engine_edits(&mut engine, std::slice::from_ref(edit));
            assert_eq!(host, engine);
        }
        assert_eq!(host.lines(), lines(&["FIRST", "inserted", "second", "tail"]));
    }

    #[test]
    fn test_engine_lines_to_host() {
        let before = TextBuffer::from_str("abc");
        let event = BufferLinesEvent {
            buffer: crate::engine::BufferId(1),
            changedtick: 2,
            start_line: 0,
            end_line: None,
            lines: lines(&["aXYc"]),
        };
        let edits = translate_engine_lines(&before, &event, &mapper());
        assert_eq!(edits, vec![HostEdit::new(range(0, 0, 0, 3), "aXYc")]);
    }

    #[test]
    fn test_full_replace_is_single_edit() {
        let before = TextBuffer::from_str("old\ncontent");
        let (edit, host_edit) = full_replace(&before, lines(&["new"]), &mapper());
        assert_eq!(edit, EngineEdit::new(0, 2, lines(&["new"])));
        let mut host = before.clone();
        apply_host_changes(&mut host, &[host_edit.into()], &mapper()).unwrap();
        assert_eq!(host.to_string(), "new");
    }
}
