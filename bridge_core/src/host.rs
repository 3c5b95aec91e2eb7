//! Interface to the host editor.
//!
//! The host delivers [`HostEvent`]s and exposes the [`HostEditor`] API the
//! sync engine drives. Every call is fire-and-forget from the engine's
//! point of view: the visible effect of an edit comes back later as a
//! `ContentChanged` event (the echo).

use crate::mapper::HostPosition;
use std::fmt;
use thiserror::Error;

/// Opaque handle for a host document or virtual document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentHandle(pub u64);

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// A range in host coordinates, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostRange {
    pub start: HostPosition,
    pub end: HostPosition,
}

impl HostRange {
    pub fn new(start: HostPosition, end: HostPosition) -> Self {
        Self { start, end }
    }

    /// An empty range at `pos`.
    pub fn caret(pos: HostPosition) -> Self {
        Self { start: pos, end: pos }
    }
}

/// A change reported by the host.
///
/// A change without a range replaces the whole document; hosts report these
/// after undo/redo or reload, when no incremental description exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostChange {
    pub range: Option<HostRange>,
    pub text: String,
}

impl HostChange {
    pub fn replace(range: HostRange, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }

    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }
}

/// An edit the sync engine asks the host to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEdit {
    pub range: HostRange,
    pub new_text: String,
}

impl HostEdit {
    pub fn new(range: HostRange, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }
}

impl From<HostEdit> for HostChange {
    fn from(edit: HostEdit) -> Self {
        HostChange::replace(edit.range, edit.new_text)
    }
}

/// A host selection. `active` is where the caret is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostSelection {
    pub anchor: HostPosition,
    pub active: HostPosition,
}

impl HostSelection {
    /// Creates a selection with no extent at `pos`.
    pub fn caret(pos: HostPosition) -> Self {
        Self {
            anchor: pos,
            active: pos,
        }
    }
}

/// Events from the host editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A file-backed document was opened in the host.
    DocumentOpened {
        document: DocumentHandle,
        name: String,
        text: String,
    },
    /// Document content changed. Changes apply in order, each against the
    /// result of the previous one; hosts report multi-cursor edits
    /// bottom-up, so their ranges are also valid against the content before
    /// the event.
    ContentChanged {
        document: DocumentHandle,
        changes: Vec<HostChange>,
    },
    /// Selections changed in a document; the first is the primary one.
    SelectionChanged {
        document: DocumentHandle,
        selections: Vec<HostSelection>,
    },
    /// A document (file-backed or virtual) was closed.
    DocumentClosed { document: DocumentHandle },
}

impl HostEvent {
    pub fn document(&self) -> DocumentHandle {
        match self {
            HostEvent::DocumentOpened { document, .. }
            | HostEvent::ContentChanged { document, .. }
            | HostEvent::SelectionChanged { document, .. }
            | HostEvent::DocumentClosed { document } => *document,
        }
    }
}

/// Errors reported by the host API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("unknown document {0}")]
    UnknownDocument(DocumentHandle),
    #[error("document {0} is read-only")]
    ReadOnly(DocumentHandle),
    #[error("host rejected the request: {0}")]
    Rejected(String),
}

/// The host editor API the sync engine drives.
pub trait HostEditor {
    /// Applies edits to a document. Ranges are relative to the content before
    /// the call and must not overlap.
    fn apply_edits(&mut self, document: DocumentHandle, edits: &[HostEdit]) -> Result<(), HostError>;

    /// Replaces the document's selections.
    fn set_selections(
        &mut self,
        document: DocumentHandle,
        selections: &[HostSelection],
    ) -> Result<(), HostError>;

    /// Opens a virtual document that no file backs.
    fn open_virtual_document(
        &mut self,
        title: &str,
        content: &str,
        read_only: bool,
    ) -> Result<DocumentHandle, HostError>;

    /// Closes a virtual document previously opened with
    /// [`open_virtual_document`](Self::open_virtual_document).
    fn close_virtual_document(&mut self, document: DocumentHandle) -> Result<(), HostError>;

    /// Opens (or focuses) a file-backed document by name with the given
    /// content, returning its handle.
    fn open_file_document(&mut self, name: &str, content: &str) -> Result<DocumentHandle, HostError>;

    /// Current text of a document as the host sees it.
    fn document_text(&self, document: DocumentHandle) -> Result<String, HostError>;

    /// The document shown in the active host view, if any.
    fn active_document(&self) -> Option<DocumentHandle>;
}
