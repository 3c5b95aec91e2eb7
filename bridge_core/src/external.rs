//! External buffers.
//!
//! Engine buffers with no file behind them (help pages, quickfix lists,
//! prompts) are shown in the host as virtual documents. Their content and
//! cursor flow from the engine to the host only.

use crate::buffer::TextBuffer;
use crate::engine::{BufferId, BufferMeta};
use crate::error::SyncError;
use crate::host::{DocumentHandle, HostEditor};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Kind of an engine buffer, from its buffer type flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// A regular file buffer.
    Normal,
    Help,
    Quickfix,
    Prompt,
    /// `nofile`, `nowrite` and `acwrite` buffers.
    Scratch,
    Terminal,
    /// Any buffer type the bridge does not know.
    Other(String),
}

impl BufferKind {
    pub fn from_buftype(buftype: &str) -> Self {
        match buftype {
            "" => BufferKind::Normal,
            "help" => BufferKind::Help,
            "quickfix" => BufferKind::Quickfix,
            "prompt" => BufferKind::Prompt,
            "nofile" | "nowrite" | "acwrite" => BufferKind::Scratch,
            "terminal" => BufferKind::Terminal,
            other => BufferKind::Other(other.to_string()),
        }
    }

    /// Whether the host can show this kind as a virtual document.
    pub fn is_representable(&self) -> bool {
        !matches!(self, BufferKind::Terminal | BufferKind::Other(_))
    }

    /// Scratch and prompt buffers are writable in the engine, so their
    /// virtual documents are not marked read-only.
    pub fn is_read_only(&self) -> bool {
        !matches!(self, BufferKind::Scratch | BufferKind::Prompt)
    }
}

/// How an engine-reported buffer maps onto the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A normal file buffer; bound to a file-backed host document.
    FileBacked,
    /// Shown as a virtual document.
    External { kind: BufferKind, read_only: bool },
    /// Cannot be shown; left unbound.
    Unbindable { kind: BufferKind },
}

/// A virtual document owned by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalBufferDescriptor {
    pub buffer: BufferId,
    pub document: DocumentHandle,
    pub title: String,
    pub read_only: bool,
}

/// Creates, tracks and tears down virtual documents for external buffers.
#[derive(Debug, Default)]
pub struct ExternalBufferManager {
    descriptors: HashMap<BufferId, ExternalBufferDescriptor>,
    unbindable: HashSet<BufferId>,
}

impl ExternalBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides how a newly reported buffer is represented.
    pub fn classify(meta: &BufferMeta) -> Classification {
        let kind = BufferKind::from_buftype(&meta.buftype);
        match kind {
            BufferKind::Normal => Classification::FileBacked,
            kind if kind.is_representable() => Classification::External {
                read_only: kind.is_read_only(),
                kind,
            },
            kind => Classification::Unbindable { kind },
        }
    }

    /// Host title for an external buffer.
    pub fn title_for(meta: &BufferMeta, kind: &BufferKind) -> String {
        let base = Path::new(&meta.name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty());
        match (kind, base) {
            (BufferKind::Help, Some(name)) => format!("{} [Help]", name),
            (BufferKind::Help, None) => "[Help]".to_string(),
            (BufferKind::Quickfix, Some(name)) => format!("{} [Quickfix List]", name),
            (BufferKind::Quickfix, None) => "[Quickfix List]".to_string(),
            (BufferKind::Prompt, Some(name)) => format!("{} [Prompt]", name),
            (BufferKind::Prompt, None) => "[Prompt]".to_string(),
            (_, Some(name)) => format!("{} [Scratch]", name),
            (_, None) => "[Scratch]".to_string(),
        }
    }

    /// Opens a virtual document for `buffer` with `content`.
    pub fn open<H: HostEditor>(
        &mut self,
        host: &mut H,
        buffer: BufferId,
        meta: &BufferMeta,
        content: &TextBuffer,
    ) -> Result<ExternalBufferDescriptor, SyncError> {
        let kind = BufferKind::from_buftype(&meta.buftype);
        if !kind.is_representable() {
            self.mark_unbindable(buffer);
            return Err(SyncError::UnbindableBuffer {
                buffer,
                buftype: meta.buftype.clone(),
            });
        }

        if let Some(existing) = self.descriptors.get(&buffer) {
            return Ok(existing.clone());
        }

        let title = Self::title_for(meta, &kind);
        let read_only = kind.is_read_only();
        let document = host.open_virtual_document(&title, &content.to_string(), read_only)?;
        log::info!("Opened {} as virtual document {} ({})", buffer, document, title);

        let descriptor = ExternalBufferDescriptor {
            buffer,
            document,
            title,
            read_only,
        };
        self.descriptors.insert(buffer, descriptor.clone());
        Ok(descriptor)
    }

    /// Closes the virtual document of `buffer` and forgets it. Unknown
    /// buffers are a no-op.
    pub fn close<H: HostEditor>(
        &mut self,
        host: &mut H,
        buffer: BufferId,
    ) -> Option<ExternalBufferDescriptor> {
        self.unbindable.remove(&buffer);
        let descriptor = self.descriptors.remove(&buffer)?;
        if let Err(e) = host.close_virtual_document(descriptor.document) {
            log::warn!("Failed to close virtual document {}: {}", descriptor.document, e);
        }
        Some(descriptor)
    }

    /// Forgets the descriptor of a virtual document the host already closed.
    pub fn forget_document(&mut self, document: DocumentHandle) -> Option<ExternalBufferDescriptor> {
        let buffer = self
            .descriptors
            .values()
            .find(|d| d.document == document)
            .map(|d| d.buffer)?;
        self.descriptors.remove(&buffer)
    }

    pub fn descriptor(&self, buffer: BufferId) -> Option<&ExternalBufferDescriptor> {
        self.descriptors.get(&buffer)
    }

    pub fn mark_unbindable(&mut self, buffer: BufferId) {
        self.unbindable.insert(buffer);
    }

    pub fn is_unbindable(&self, buffer: BufferId) -> bool {
        self.unbindable.contains(&buffer)
    }

    /// Buffers with an open virtual document.
    pub fn buffers(&self) -> Vec<BufferId> {
        let mut ids: Vec<BufferId> = self.descriptors.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    fn meta(name: &str, buftype: &str) -> BufferMeta {
        BufferMeta {
            name: name.to_string(),
            buftype: buftype.to_string(),
            modifiable: false,
            line_count: 1,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(ExternalBufferManager::classify(&meta("a.rs", "")), Classification::FileBacked);
        assert_eq!(
            ExternalBufferManager::classify(&meta("", "help")),
            Classification::External {
                kind: BufferKind::Help,
                read_only: true
            }
        );
        assert_eq!(
            ExternalBufferManager::classify(&meta("", "prompt")),
            Classification::External {
                kind: BufferKind::Prompt,
                read_only: false
            }
        );
        assert_eq!(
            ExternalBufferManager::classify(&meta("", "terminal")),
            Classification::Unbindable {
                kind: BufferKind::Terminal
            }
        );
    }

    #[test]
    fn test_titles() {
        let help = meta("/usr/share/doc/help.txt", "help");
        assert_eq!(ExternalBufferManager::title_for(&help, &BufferKind::Help), "help.txt [Help]");
        let qf = meta("", "quickfix");
        assert_eq!(ExternalBufferManager::title_for(&qf, &BufferKind::Quickfix), "[Quickfix List]");
    }

    #[test]
    fn test_open_and_close() {
        let mut host = MemoryHost::new();
        let mut manager = ExternalBufferManager::new();
        let content = TextBuffer::from_str("*topic*\nline2");

        let descriptor = manager
            .open(&mut host, BufferId(5), &meta("help.txt", "help"), &content)
            .unwrap();
        assert!(descriptor.read_only);
        assert_eq!(host.text(descriptor.document).as_deref(), Some("*topic*\nline2"));
        assert!(host.is_read_only(descriptor.document));

        // Opening again returns the same document.
        let again = manager
            .open(&mut host, BufferId(5), &meta("help.txt", "help"), &content)
            .unwrap();
        assert_eq!(again.document, descriptor.document);

        let closed = manager.close(&mut host, BufferId(5)).unwrap();
        assert_eq!(closed.document, descriptor.document);
        assert!(host.text(descriptor.document).is_none());
        assert!(manager.close(&mut host, BufferId(5)).is_none());
    }

    #[test]
    fn test_unbindable_is_remembered() {
        let mut host = MemoryHost::new();
        let mut manager = ExternalBufferManager::new();
        let result = manager.open(&mut host, BufferId(7), &meta("", "terminal"), &TextBuffer::new());
        assert!(matches!(result, Err(SyncError::UnbindableBuffer { .. })));
        assert!(manager.is_unbindable(BufferId(7)));
        assert!(manager.is_empty());
    }
}
