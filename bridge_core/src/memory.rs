//! In-memory host editor.
//!
//! Keeps documents as [`TextBuffer`]s and records the events a real host
//! would emit, including the echoes of edits and selections made through
//! the [`HostEditor`] API. Used by the headless binary and the tests.

use crate::buffer::TextBuffer;
use crate::host::{
    DocumentHandle, HostChange, HostEdit, HostEditor, HostError, HostEvent, HostSelection,
};
use crate::mapper::{CoordinateMapper, HostUnit};
use crate::translate::apply_host_changes;
use std::collections::{BTreeMap, VecDeque};

/// A document held by [`MemoryHost`].
#[derive(Debug, Clone)]
struct MemoryDocument {
    name: String,
    content: TextBuffer,
    read_only: bool,
    is_virtual: bool,
    selections: Vec<HostSelection>,
}

/// A [`HostEditor`] backed by in-memory documents.
#[derive(Debug)]
pub struct MemoryHost {
    documents: BTreeMap<DocumentHandle, MemoryDocument>,
    next_handle: u64,
    active: Option<DocumentHandle>,
    events: VecDeque<HostEvent>,
    mapper: CoordinateMapper,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Creates a host that counts columns in UTF-16 code units.
    pub fn new() -> Self {
        Self::with_unit(HostUnit::Utf16)
    }

    pub fn with_unit(unit: HostUnit) -> Self {
        Self {
            documents: BTreeMap::new(),
            next_handle: 1,
            active: None,
            events: VecDeque::new(),
            mapper: CoordinateMapper::new(unit),
        }
    }

    fn insert(&mut self, document: MemoryDocument) -> DocumentHandle {
        let handle = DocumentHandle(self.next_handle);
        self.next_handle += 1;
        self.documents.insert(handle, document);
        self.active = Some(handle);
        handle
    }

    fn document_mut(&mut self, document: DocumentHandle) -> Result<&mut MemoryDocument, HostError> {
        self.documents
            .get_mut(&document)
            .ok_or(HostError::UnknownDocument(document))
    }

    /// Opens a file-backed document as the user would, emitting
    /// `DocumentOpened`.
    pub fn open_document(&mut self, name: &str, text: &str) -> DocumentHandle {
        let handle = self.insert(MemoryDocument {
            name: name.to_string(),
            content: TextBuffer::from_str(text),
            read_only: false,
            is_virtual: false,
            selections: Vec::new(),
        });
        self.events.push_back(HostEvent::DocumentOpened {
            document: handle,
            name: name.to_string(),
            text: text.to_string(),
        });
        handle
    }

    /// Closes a document as the user would, emitting `DocumentClosed`.
    pub fn close_document(&mut self, document: DocumentHandle) -> Result<(), HostError> {
        self.documents
            .remove(&document)
            .ok_or(HostError::UnknownDocument(document))?;
        if self.active == Some(document) {
            self.active = None;
        }
        self.events.push_back(HostEvent::DocumentClosed { document });
        Ok(())
    }

    /// Edits a document as the user would. Read-only documents refuse.
    pub fn user_edit(
        &mut self,
        document: DocumentHandle,
        changes: Vec<HostChange>,
    ) -> Result<(), HostError> {
        let mapper = self.mapper;
        let doc = self.document_mut(document)?;
        if doc.read_only {
            return Err(HostError::ReadOnly(document));
        }
        apply_host_changes(&mut doc.content, &changes, &mapper)
            .map_err(|e| HostError::Rejected(e.to_string()))?;
        self.events
            .push_back(HostEvent::ContentChanged { document, changes });
        Ok(())
    }

    /// Moves the selections as the user would.
    pub fn user_select(
        &mut self,
        document: DocumentHandle,
        selections: Vec<HostSelection>,
    ) -> Result<(), HostError> {
        let doc = self.document_mut(document)?;
        doc.selections = selections.clone();
        self.events.push_back(HostEvent::SelectionChanged {
            document,
            selections,
        });
        Ok(())
    }

    /// Makes `document` the active view.
    pub fn set_active(&mut self, document: Option<DocumentHandle>) {
        self.active = document;
    }

    /// Drains the events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<HostEvent> {
        self.events.drain(..).collect()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn text(&self, document: DocumentHandle) -> Option<String> {
        self.documents.get(&document).map(|d| d.content.to_string())
    }

    pub fn name(&self, document: DocumentHandle) -> Option<&str> {
        self.documents.get(&document).map(|d| d.name.as_str())
    }

    pub fn is_read_only(&self, document: DocumentHandle) -> bool {
        self.documents.get(&document).map_or(false, |d| d.read_only)
    }

    pub fn is_virtual(&self, document: DocumentHandle) -> bool {
        self.documents.get(&document).map_or(false, |d| d.is_virtual)
    }

    pub fn selections(&self, document: DocumentHandle) -> Option<&[HostSelection]> {
        self.documents.get(&document).map(|d| d.selections.as_slice())
    }

    /// Finds an open document by name.
    pub fn find(&self, name: &str) -> Option<DocumentHandle> {
        self.documents
            .iter()
            .find(|(_, d)| d.name == name)
            .map(|(handle, _)| *handle)
    }

    /// Handles of all open documents, in opening order.
    pub fn documents(&self) -> Vec<DocumentHandle> {
        self.documents.keys().copied().collect()
    }
}

impl HostEditor for MemoryHost {
    fn apply_edits(&mut self, document: DocumentHandle, edits: &[HostEdit]) -> Result<(), HostError> {
        let mapper = self.mapper;
        let doc = self.document_mut(document)?;

        // Bottom-up keeps every range valid against the pre-call content.
        let mut sorted: Vec<&HostEdit> = edits.iter().collect();
        sorted.sort_by(|a, b| b.range.start.cmp(&a.range.start));
        let changes: Vec<HostChange> = sorted.into_iter().cloned().map(HostChange::from).collect();

        apply_host_changes(&mut doc.content, &changes, &mapper)
            .map_err(|e| HostError::Rejected(e.to_string()))?;
        self.events
            .push_back(HostEvent::ContentChanged { document, changes });
        Ok(())
    }

    fn set_selections(
        &mut self,
        document: DocumentHandle,
        selections: &[HostSelection],
    ) -> Result<(), HostError> {
        let doc = self.document_mut(document)?;
        doc.selections = selections.to_vec();
        self.events.push_back(HostEvent::SelectionChanged {
            document,
            selections: selections.to_vec(),
        });
        Ok(())
    }

    fn open_virtual_document(
        &mut self,
        title: &str,
        content: &str,
        read_only: bool,
    ) -> Result<DocumentHandle, HostError> {
        Ok(self.insert(MemoryDocument {
            name: title.to_string(),
            content: TextBuffer::from_str(content),
            read_only,
            is_virtual: true,
            selections: Vec::new(),
        }))
    }

    fn close_virtual_document(&mut self, document: DocumentHandle) -> Result<(), HostError> {
        match self.documents.get(&document) {
            Some(doc) if doc.is_virtual => self.close_document(document),
            Some(_) => Err(HostError::Rejected(format!("{} is not a virtual document", document))),
            None => Err(HostError::UnknownDocument(document)),
        }
    }

    fn open_file_document(&mut self, name: &str, content: &str) -> Result<DocumentHandle, HostError> {
        let existing = self
            .documents
            .iter()
            .find(|(_, d)| !d.is_virtual && d.name == name)
            .map(|(handle, _)| *handle);
        if let Some(handle) = existing {
            self.active = Some(handle);
            return Ok(handle);
        }
        Ok(self.insert(MemoryDocument {
            name: name.to_string(),
            content: TextBuffer::from_str(content),
            read_only: false,
            is_virtual: false,
            selections: Vec::new(),
        }))
    }

    fn document_text(&self, document: DocumentHandle) -> Result<String, HostError> {
        self.text(document).ok_or(HostError::UnknownDocument(document))
    }

    fn active_document(&self) -> Option<DocumentHandle> {
        self.active
    }
}
