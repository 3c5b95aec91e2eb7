//! Wire messages between the bridge and the engine.
//!
//! Maps the core's [`EngineRequest`]s onto JSON-RPC methods and the
//! engine's notifications and results back onto core types. Line ranges are
//! 0-indexed and end-exclusive; an `end_line` of `-1` means "through the end
//! of the buffer".

use modal_bridge_core::{
    BufferId, BufferLinesEvent, BufferMeta, EngineEdit, EngineNotification, EnginePosition,
    EngineReply, EngineRequest, RequestId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Requests and notifications to the engine.
pub const CREATE_BUFFER: &str = "buffer/create";
pub const APPLY_EDITS: &str = "buffer/applyEdits";
pub const SET_CURSOR: &str = "buffer/setCursor";
pub const GET_LINES: &str = "buffer/getLines";
pub const CLOSE_BUFFER: &str = "buffer/close";

// Notifications from the engine.
pub const BUFFER_ATTACHED: &str = "buffer/attached";
pub const BUFFER_LINES: &str = "buffer/lines";
pub const CURSOR_MOVED: &str = "cursor/moved";
pub const BUFFER_CLOSED: &str = "buffer/closed";

/// Params of `buffer/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBufferParams {
    pub name: String,
    pub lines: Vec<String>,
}

/// Result of `buffer/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBufferResult {
    pub buffer: u64,
}

/// One line replacement on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEdit {
    pub start_line: usize,
    pub end_line: i64,
    pub lines: Vec<String>,
}

/// Params of `buffer/applyEdits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyEditsParams {
    pub buffer: u64,
    pub edits: Vec<WireEdit>,
}

/// Params of `buffer/setCursor` and `cursor/moved`. `byte` is a byte offset
/// into the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorParams {
    pub buffer: u64,
    pub line: usize,
    pub byte: usize,
}

/// Params naming a single buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferParams {
    pub buffer: u64,
}

/// Result of `buffer/getLines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLinesResult {
    pub changedtick: u64,
    pub lines: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Params of `buffer/attached`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedParams {
    pub buffer: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub buftype: String,
    #[serde(default = "default_true")]
    pub modifiable: bool,
    /// Total line count; `lines` may hold fewer for large buffers.
    #[serde(default)]
    pub line_count: Option<usize>,
    pub lines: Vec<String>,
}

/// Params of `buffer/lines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesParams {
    pub buffer: u64,
    pub changedtick: u64,
    pub start_line: usize,
    pub end_line: i64,
    pub lines: Vec<String>,
}

/// An outbound message ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Expects a response, correlated by `id`.
    Request {
        id: RequestId,
        method: &'static str,
        params: Value,
        buffer: Option<BufferId>,
    },
    Notification {
        method: &'static str,
        params: Value,
    },
}

pub fn end_line_to_wire(end_line: Option<usize>) -> i64 {
    end_line.map_or(-1, |end| end as i64)
}

pub fn end_line_from_wire(end_line: i64) -> Option<usize> {
    usize::try_from(end_line).ok()
}

impl From<&EngineEdit> for WireEdit {
    fn from(edit: &EngineEdit) -> Self {
        Self {
            start_line: edit.start_line,
            end_line: end_line_to_wire(Some(edit.end_line)),
            lines: edit.lines.clone(),
        }
    }
}

/// Encodes a core request for the wire.
pub fn encode_request(request: &EngineRequest) -> serde_json::Result<Outbound> {
    Ok(match request {
        EngineRequest::CreateBuffer { id, name, lines } => Outbound::Request {
            id: *id,
            method: CREATE_BUFFER,
            params: serde_json::to_value(CreateBufferParams {
                name: name.clone(),
                lines: lines.clone(),
            })?,
            buffer: None,
        },
        EngineRequest::ApplyEdits { buffer, edits } => Outbound::Notification {
            method: APPLY_EDITS,
            params: serde_json::to_value(ApplyEditsParams {
                buffer: buffer.0,
                edits: edits.iter().map(WireEdit::from).collect(),
            })?,
        },
        EngineRequest::SetCursor { buffer, position } => Outbound::Notification {
            method: SET_CURSOR,
            params: serde_json::to_value(CursorParams {
                buffer: buffer.0,
                line: position.line,
                byte: position.byte,
            })?,
        },
        EngineRequest::FetchLines { id, buffer } => Outbound::Request {
            id: *id,
            method: GET_LINES,
            params: serde_json::to_value(BufferParams { buffer: buffer.0 })?,
            buffer: Some(*buffer),
        },
        EngineRequest::CloseBuffer { buffer } => Outbound::Notification {
            method: CLOSE_BUFFER,
            params: serde_json::to_value(BufferParams { buffer: buffer.0 })?,
        },
    })
}

/// Decodes an engine notification. Unknown methods and malformed params
/// yield `None`.
pub fn decode_notification(method: &str, params: Option<Value>) -> Option<EngineNotification> {
    let params = params.unwrap_or(Value::Null);
    let decoded = match method {
        BUFFER_ATTACHED => serde_json::from_value::<AttachedParams>(params).map(|p| {
            EngineNotification::BufferAttached {
                buffer: BufferId(p.buffer),
                meta: BufferMeta {
                    name: p.name,
                    buftype: p.buftype,
                    modifiable: p.modifiable,
                    line_count: p.line_count.unwrap_or(p.lines.len()),
                },
                lines: p.lines,
            }
        }),
        BUFFER_LINES => serde_json::from_value::<LinesParams>(params).map(|p| {
            EngineNotification::BufferLines(BufferLinesEvent {
                buffer: BufferId(p.buffer),
                changedtick: p.changedtick,
                start_line: p.start_line,
                end_line: end_line_from_wire(p.end_line),
                lines: p.lines,
            })
        }),
        CURSOR_MOVED => serde_json::from_value::<CursorParams>(params).map(|p| {
            EngineNotification::CursorMoved {
                buffer: BufferId(p.buffer),
                position: EnginePosition::new(p.line, p.byte),
            }
        }),
        BUFFER_CLOSED => serde_json::from_value::<BufferParams>(params).map(|p| {
            EngineNotification::BufferClosed {
                buffer: BufferId(p.buffer),
            }
        }),
        _ => {
            log::trace!("Unhandled notification: {}", method);
            return None;
        }
    };

    match decoded {
        Ok(notification) => Some(notification),
        Err(e) => {
            log::warn!("Malformed {} notification: {}", method, e);
            None
        }
    }
}

/// Decodes the successful result of a request sent as `method`.
pub fn decode_result(
    method: &str,
    id: RequestId,
    buffer: Option<BufferId>,
    result: Option<Value>,
) -> Option<EngineReply> {
    let result = result.unwrap_or(Value::Null);
    let decoded = match (method, buffer) {
        (CREATE_BUFFER, _) => serde_json::from_value::<CreateBufferResult>(result).map(|r| {
            EngineReply::BufferCreated {
                id,
                buffer: BufferId(r.buffer),
            }
        }),
        (GET_LINES, Some(buffer)) => serde_json::from_value::<GetLinesResult>(result).map(|r| {
            EngineReply::Lines {
                id,
                buffer,
                changedtick: r.changedtick,
                lines: r.lines,
            }
        }),
        _ => {
            log::debug!("Unhandled response method: {}", method);
            return None;
        }
    };

    Some(decoded.unwrap_or_else(|e| EngineReply::Error {
        id,
        message: format!("malformed {} result: {}", method, e),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_edits_is_a_notification() {
        let request = EngineRequest::ApplyEdits {
            buffer: BufferId(2),
            edits: vec![EngineEdit::new(0, 1, vec!["aXYc".to_string()])],
        };
        let encoded = encode_request(&request).unwrap();
        assert_eq!(
            encoded,
            Outbound::Notification {
                method: APPLY_EDITS,
                params: json!({
                    "buffer": 2,
                    "edits": [{ "start_line": 0, "end_line": 1, "lines": ["aXYc"] }]
                }),
            }
        );
    }

    #[test]
    fn test_fetch_lines_remembers_buffer() {
        let encoded = encode_request(&EngineRequest::FetchLines {
            id: 4,
            buffer: BufferId(9),
        })
        .unwrap();
        match encoded {
            Outbound::Request {
                id, method, buffer, ..
            } => {
                assert_eq!(id, 4);
                assert_eq!(method, GET_LINES);
                assert_eq!(buffer, Some(BufferId(9)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lines_with_open_end() {
        let notification = decode_notification(
            BUFFER_LINES,
            Some(json!({
                "buffer": 1,
                "changedtick": 12,
                "start_line": 3,
                "end_line": -1,
                "lines": ["tail"]
            })),
        );
        assert_eq!(
            notification,
            Some(EngineNotification::BufferLines(BufferLinesEvent {
                buffer: BufferId(1),
                changedtick: 12,
                start_line: 3,
                end_line: None,
                lines: vec!["tail".to_string()],
            }))
        );
    }

    #[test]
    fn test_attached_defaults() {
        let notification = decode_notification(
            BUFFER_ATTACHED,
            Some(json!({ "buffer": 5, "lines": ["a", "b"] })),
        );
        match notification {
            Some(EngineNotification::BufferAttached { buffer, meta, .. }) => {
                assert_eq!(buffer, BufferId(5));
                assert_eq!(meta.buftype, "");
                assert!(meta.modifiable);
                assert_eq!(meta.line_count, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_and_unknown_notifications() {
        assert!(decode_notification(CURSOR_MOVED, Some(json!({ "buffer": "x" }))).is_none());
        assert!(decode_notification("engine/somethingElse", None).is_none());
    }

    #[test]
    fn test_decode_results() {
        let created = decode_result(CREATE_BUFFER, 1, None, Some(json!({ "buffer": 8 })));
        assert_eq!(
            created,
            Some(EngineReply::BufferCreated {
                id: 1,
                buffer: BufferId(8)
            })
        );

        let lines = decode_result(
            GET_LINES,
            2,
            Some(BufferId(8)),
            Some(json!({ "changedtick": 3, "lines": [""] })),
        );
        assert_eq!(
            lines,
            Some(EngineReply::Lines {
                id: 2,
                buffer: BufferId(8),
                changedtick: 3,
                lines: vec![String::new()],
            })
        );

        let broken = decode_result(CREATE_BUFFER, 3, None, None);
        assert!(matches!(broken, Some(EngineReply::Error { id: 3, .. })));
    }

    #[test]
    fn test_end_line_conversion() {
        assert_eq!(end_line_to_wire(None), -1);
        assert_eq!(end_line_from_wire(-1), None);
        assert_eq!(end_line_from_wire(4), Some(4));
    }
}
