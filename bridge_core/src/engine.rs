//! Interface to the embedded engine.
//!
//! Requests go out through an [`EngineChannel`]; the engine answers with
//! [`EngineReply`]s and reports its own activity as
//! [`EngineNotification`]s. Both arrive on the event loop as
//! [`SyncEvent`](crate::sync::SyncEvent)s, in channel order.

use crate::error::SyncError;
use crate::mapper::EnginePosition;
use std::fmt;

/// Engine-side buffer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Request ID for correlating replies.
pub type RequestId = u64;

/// Replacement of whole engine lines: lines `start_line..end_line` become
/// `lines`. `end_line` is clamped to the buffer's line count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEdit {
    pub start_line: usize,
    pub end_line: usize,
    pub lines: Vec<String>,
}

impl EngineEdit {
    pub fn new(start_line: usize, end_line: usize, lines: Vec<String>) -> Self {
        Self {
            start_line,
            end_line,
            lines,
        }
    }

    /// Replaces every line of a buffer that currently has `line_count` lines.
    pub fn replace_all(line_count: usize, lines: Vec<String>) -> Self {
        Self::new(0, line_count, lines)
    }
}

/// Metadata the engine reports when a buffer attaches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferMeta {
    /// Buffer name, usually a file path; may be empty.
    pub name: String,
    /// The engine's buffer type flag (`""` for normal file buffers).
    pub buftype: String,
    /// Whether the engine allows modifying the buffer.
    pub modifiable: bool,
    pub line_count: usize,
}

/// A buffer-update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLinesEvent {
    pub buffer: BufferId,
    /// Engine change counter after this update; strictly increasing.
    pub changedtick: u64,
    pub start_line: usize,
    /// Exclusive; `None` means through the end of the buffer.
    pub end_line: Option<usize>,
    pub lines: Vec<String>,
}

impl BufferLinesEvent {
    /// The update as a line replacement against a buffer of `line_count`
    /// lines.
    pub fn to_edit(&self, line_count: usize) -> EngineEdit {
        let end = self.end_line.unwrap_or(line_count).min(line_count);
        EngineEdit::new(self.start_line, end.max(self.start_line), self.lines.clone())
    }

    /// Whether this update is the engine reporting `edit` back. An open end
    /// matches any end line.
    pub fn echoes(&self, edit: &EngineEdit) -> bool {
        self.start_line == edit.start_line
            && self.end_line.map_or(true, |end| end == edit.end_line)
            && self.lines == edit.lines
    }
}

/// Notifications from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotification {
    /// A buffer attached, with its metadata and initial content.
    BufferAttached {
        buffer: BufferId,
        meta: BufferMeta,
        lines: Vec<String>,
    },
    /// Buffer content changed.
    BufferLines(BufferLinesEvent),
    /// The engine cursor moved.
    CursorMoved {
        buffer: BufferId,
        position: EnginePosition,
    },
    /// A buffer was closed or wiped.
    BufferClosed { buffer: BufferId },
}

impl EngineNotification {
    pub fn buffer(&self) -> BufferId {
        match self {
            EngineNotification::BufferAttached { buffer, .. }
            | EngineNotification::CursorMoved { buffer, .. }
            | EngineNotification::BufferClosed { buffer } => *buffer,
            EngineNotification::BufferLines(event) => event.buffer,
        }
    }
}

/// Requests sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRequest {
    /// Create a buffer for a host document and attach to it.
    CreateBuffer {
        id: RequestId,
        name: String,
        lines: Vec<String>,
    },
    /// Apply line replacements in order.
    ApplyEdits {
        buffer: BufferId,
        edits: Vec<EngineEdit>,
    },
    /// Move the engine cursor.
    SetCursor {
        buffer: BufferId,
        position: EnginePosition,
    },
    /// Fetch the full buffer content.
    FetchLines { id: RequestId, buffer: BufferId },
    /// Close the buffer.
    CloseBuffer { buffer: BufferId },
}

/// Replies to requests that carry a [`RequestId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineReply {
    BufferCreated {
        id: RequestId,
        buffer: BufferId,
    },
    Lines {
        id: RequestId,
        buffer: BufferId,
        changedtick: u64,
        lines: Vec<String>,
    },
    Error {
        id: RequestId,
        message: String,
    },
}

impl EngineReply {
    pub fn id(&self) -> RequestId {
        match self {
            EngineReply::BufferCreated { id, .. }
            | EngineReply::Lines { id, .. }
            | EngineReply::Error { id, .. } => *id,
        }
    }
}

/// Outbound half of the ordered channel to the engine.
pub trait EngineChannel {
    /// Queues a request. Fails only when the channel itself is gone.
    fn send(&mut self, request: EngineRequest) -> Result<(), SyncError>;
}
