//! Buffer bindings between engine buffers and host documents.

use crate::buffer::TextBuffer;
use crate::engine::BufferId;
use crate::host::DocumentHandle;
use std::collections::HashMap;

/// Association between one engine buffer and one host document.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Host document (or virtual document) handle.
    pub document: DocumentHandle,
    /// Engine buffer ID.
    pub buffer: BufferId,
    /// Whether the document is a virtual view of an external buffer.
    pub external: bool,
    /// Bumped on every edit applied from either side.
    pub revision: u64,
    /// Content both sides last agreed on.
    pub content: TextBuffer,
    /// Last engine change counter seen for the buffer.
    pub engine_tick: Option<u64>,
}

impl Binding {
    fn new(buffer: BufferId, document: DocumentHandle, external: bool, content: TextBuffer) -> Self {
        Self {
            document,
            buffer,
            external,
            revision: 0,
            content,
            engine_tick: None,
        }
    }

    /// Advances the revision counter and returns the new value.
    pub fn bump_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Whether `tick` is not newer than the last engine change counter seen.
    pub fn is_stale(&self, tick: u64) -> bool {
        matches!(self.engine_tick, Some(current) if tick <= current)
    }

    /// Records an engine change counter. Returns false if it is not newer
    /// than the last one seen.
    pub fn observe_tick(&mut self, tick: u64) -> bool {
        match self.engine_tick {
            Some(current) if tick <= current => false,
            _ => {
                self.engine_tick = Some(tick);
                true
            }
        }
    }
}

/// Table of bindings, indexed by both sides' identifiers.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    bindings: HashMap<BufferId, Binding>,
    by_document: HashMap<DocumentHandle, BufferId>,
}

impl BufferRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `buffer` to `document`.
    ///
    /// Binding an already-bound buffer moves it to the new handle and keeps
    /// its revision and content; `content` only seeds new bindings.
    pub fn bind(
        &mut self,
        buffer: BufferId,
        document: DocumentHandle,
        external: bool,
        content: TextBuffer,
    ) -> &mut Binding {
        // A document may belong to one buffer only.
        if let Some(previous) = self.by_document.get(&document).copied() {
            if previous != buffer {
                log::debug!("{} moves from {} to {}", document, previous, buffer);
                self.bindings.remove(&previous);
            }
        }

        if let Some(existing) = self.bindings.get(&buffer) {
            if existing.document != document {
                log::debug!("Rebinding {} from {} to {}", buffer, existing.document, document);
                self.by_document.remove(&existing.document);
            }
        }
        self.by_document.insert(document, buffer);

        let binding = self
            .bindings
            .entry(buffer)
            .or_insert_with(|| Binding::new(buffer, document, external, content));
        binding.document = document;
        binding.external = external;
        binding
    }

    /// Removes the binding of `buffer`. Unknown buffers are a no-op.
    pub fn unbind(&mut self, buffer: BufferId) -> Option<Binding> {
        let binding = self.bindings.remove(&buffer)?;
        self.by_document.remove(&binding.document);
        Some(binding)
    }

    pub fn lookup_by_engine_id(&self, buffer: BufferId) -> Option<&Binding> {
        self.bindings.get(&buffer)
    }

    pub fn lookup_by_engine_id_mut(&mut self, buffer: BufferId) -> Option<&mut Binding> {
        self.bindings.get_mut(&buffer)
    }

    pub fn lookup_by_host_handle(&self, document: DocumentHandle) -> Option<&Binding> {
        self.by_document
            .get(&document)
            .and_then(|buffer| self.bindings.get(buffer))
    }

    /// Returns the number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Returns all bound buffer IDs, sorted.
    pub fn buffers(&self) -> Vec<BufferId> {
        let mut ids: Vec<BufferId> = self.bindings.keys().copied().collect();
        ids.sort();
        ids
    }
}
