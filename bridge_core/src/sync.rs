//! The synchronization engine.
//!
//! [`SyncEngine`] owns every binding and drives both sides from one event
//! loop. Each host event, engine notification and engine reply arrives as a
//! [`SyncEvent`] and is handled to completion before the next one.
//!
//! Every edit the engine applies to one side leaves a pending edit token on
//! the binding. The echo of that edit consumes the token instead of being
//! forwarded back, which is what keeps the two sides from ping-ponging.
//! Anything else that shows up while a token is outstanding waits in the
//! binding's queue and is replayed once the token clears. Tokens that are
//! never acknowledged expire and force a full resync from the engine.

use crate::buffer::{LineEnding, TextBuffer};
use crate::config::SyncConfig;
use crate::engine::{
    BufferId, BufferLinesEvent, BufferMeta, EngineChannel, EngineEdit, EngineNotification,
    EngineReply, EngineRequest, RequestId,
};
use crate::error::SyncError;
use crate::external::{Classification, ExternalBufferManager};
use crate::host::{DocumentHandle, HostChange, HostEditor, HostEvent, HostSelection};
use crate::mapper::{CoordinateMapper, EnginePosition, HostPosition};
use crate::registry::BufferRegistry;
use crate::token::{PendingEdit, TokenTable};
use crate::translate::{
    apply_host_changes, full_replace, translate_engine_lines, translate_host_changes,
    TranslateError,
};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// An input to [`SyncEngine::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Host(HostEvent),
    Engine(EngineNotification),
    Reply(EngineReply),
}

/// What a binding is doing, derived from its outstanding token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Idle,
    /// A host edit was sent to the engine and its echo is pending.
    ApplyingLocal,
    /// An engine edit was applied to the host and its echo is pending.
    ApplyingRemote,
    /// Waiting for the engine's full content.
    Resyncing,
    /// Idle binding of an external buffer; content only flows to the host.
    ExternalSync,
}

/// An event held back while its binding has a token outstanding.
#[derive(Debug, Clone)]
enum Deferred {
    Host(HostEvent),
    Engine(EngineNotification),
}

impl Deferred {
    fn is_cursor(&self) -> bool {
        matches!(
            self,
            Deferred::Host(HostEvent::SelectionChanged { .. })
                | Deferred::Engine(EngineNotification::CursorMoved { .. })
        )
    }

    fn same_side(&self, other: &Deferred) -> bool {
        matches!(
            (self, other),
            (Deferred::Host(_), Deferred::Host(_)) | (Deferred::Engine(_), Deferred::Engine(_))
        )
    }
}

/// How an event on a binding with a token outstanding is handled.
enum Route {
    Echo,
    Defer,
    Drop,
}

/// A host document waiting for its engine buffer.
#[derive(Debug, Clone)]
struct PendingOpen {
    document: DocumentHandle,
    name: String,
    content: TextBuffer,
    /// The host closed the document before the engine answered.
    closed: bool,
}

/// Keeps host documents and engine buffers in sync.
pub struct SyncEngine {
    config: SyncConfig,
    mapper: CoordinateMapper,
    registry: BufferRegistry,
    externals: ExternalBufferManager,
    tokens: TokenTable,
    queues: HashMap<BufferId, VecDeque<Deferred>>,
    pending_opens: HashMap<RequestId, PendingOpen>,
    /// Last caret we placed in the host, per binding.
    host_cursor_sent: HashMap<BufferId, HostPosition>,
    /// Last cursor we sent to the engine, per binding.
    engine_cursor_sent: HashMap<BufferId, EnginePosition>,
    next_request_id: RequestId,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        let mapper = CoordinateMapper::new(config.host_unit);
        Self {
            config,
            mapper,
            registry: BufferRegistry::new(),
            externals: ExternalBufferManager::new(),
            tokens: TokenTable::new(),
            queues: HashMap::new(),
            pending_opens: HashMap::new(),
            host_cursor_sent: HashMap::new(),
            engine_cursor_sent: HashMap::new(),
            next_request_id: 1,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    pub fn externals(&self) -> &ExternalBufferManager {
        &self.externals
    }

    /// Number of outstanding tokens across all bindings.
    pub fn pending_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Number of events waiting in the queue of `buffer`.
    pub fn queued(&self, buffer: BufferId) -> usize {
        self.queues.get(&buffer).map_or(0, |q| q.len())
    }

    /// State of the binding of `buffer`, or `None` if it is not bound.
    pub fn state(&self, buffer: BufferId) -> Option<BindingState> {
        let binding = self.registry.lookup_by_engine_id(buffer)?;
        Some(match self.tokens.outstanding(buffer).map(|t| &t.pending) {
            Some(PendingEdit::Local { .. }) => BindingState::ApplyingLocal,
            Some(PendingEdit::Remote { .. }) => BindingState::ApplyingRemote,
            Some(PendingEdit::Resync { .. }) => BindingState::Resyncing,
            None if binding.external => BindingState::ExternalSync,
            None => BindingState::Idle,
        })
    }

    fn next_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Handles one event.
    ///
    /// Only transport failures are returned; every other problem is logged
    /// and repaired by resyncing the affected binding.
    pub fn handle<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        event: SyncEvent,
    ) -> Result<(), SyncError> {
        let result = match event {
            SyncEvent::Host(event) => self.on_host_event(host, engine, event),
            SyncEvent::Engine(notification) => self.on_engine_notification(host, engine, notification),
            SyncEvent::Reply(reply) => self.on_reply(host, engine, reply),
        };
        match result {
            Err(e) if e.is_fatal() => {
                log::error!("{}", e);
                Err(e)
            }
            Err(e) => {
                log::warn!("{}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Binds `document` to an engine buffer that already exists. `text` is
    /// the content the engine buffer holds; if the host has moved on, the
    /// host content is pushed to the engine.
    pub fn attach<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        document: DocumentHandle,
        buffer: BufferId,
        text: &str,
    ) -> Result<(), SyncError> {
        let mut content = TextBuffer::from_str(text);
        content.set_line_ending(LineEnding::detect(text, self.config.default_line_ending));
        self.bind(buffer, document, false, content);
        log::info!("Attached {} to {}", document, buffer);
        self.reconcile_with_host(host, engine, buffer)
    }

    /// Forces a full resync of `buffer` from the engine.
    pub fn resync<E: EngineChannel>(&mut self, engine: &mut E, buffer: BufferId) -> Result<(), SyncError> {
        let revision = match self.registry.lookup_by_engine_id(buffer) {
            Some(binding) => binding.revision,
            None => {
                self.tokens.cancel(buffer);
                return Ok(());
            }
        };
        let id = self.next_id();
        self.tokens.issue(buffer, revision, PendingEdit::Resync { request: id });
        log::debug!("Resyncing {} (request {})", buffer, id);
        engine.send(EngineRequest::FetchLines { id, buffer })
    }

    /// Resyncs every binding whose token has waited longer than the echo
    /// timeout at `now`.
    ///
    /// A resync fetch that itself times out is not retried: its token is
    /// dropped and the binding goes back to idle with the content it has.
    pub fn expire_tokens<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        now: Instant,
    ) -> Result<(), SyncError> {
        let timeout = self.config.echo_timeout();
        for key in self.tokens.expired(now, timeout) {
            let timed_out = SyncError::EchoTimeout {
                buffer: key.buffer,
                revision: key.revision,
                timeout,
            };
            log::warn!("{}", timed_out);

            let resyncing = matches!(
                self.tokens.outstanding(key.buffer).map(|t| &t.pending),
                Some(PendingEdit::Resync { .. })
            );
            if resyncing {
                log::warn!("Giving up on resync of {}", key.buffer);
                self.tokens.consume(key.buffer);
                self.drain(host, engine, key.buffer)?;
            } else {
                self.resync(engine, key.buffer)?;
            }
        }
        Ok(())
    }

    /// Tears every binding down: tokens and queues are dropped and virtual
    /// documents closed. Used when the engine connection goes away.
    pub fn shutdown<H: HostEditor>(&mut self, host: &mut H) {
        for buffer in self.externals.buffers() {
            self.externals.close(host, buffer);
        }
        for buffer in self.registry.buffers() {
            self.registry.unbind(buffer);
        }
        self.tokens.clear();
        self.queues.clear();
        self.pending_opens.clear();
        self.host_cursor_sent.clear();
        self.engine_cursor_sent.clear();
        log::info!("Sync engine shut down");
    }

    // Host side

    fn on_host_event<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        event: HostEvent,
    ) -> Result<(), SyncError> {
        match event {
            HostEvent::DocumentOpened {
                document,
                name,
                text,
            } => self.on_document_opened(engine, document, name, &text),
            HostEvent::DocumentClosed { document } => self.on_document_closed(engine, document),
            event => {
                let document = event.document();
                let buffer = match self.registry.lookup_by_host_handle(document) {
                    Some(binding) => binding.buffer,
                    None => {
                        log::trace!("Ignoring event for unbound {}", document);
                        return Ok(());
                    }
                };
                self.route_host(host, engine, buffer, event)
            }
        }
    }

    fn on_document_opened<E: EngineChannel>(
        &mut self,
        engine: &mut E,
        document: DocumentHandle,
        name: String,
        text: &str,
    ) -> Result<(), SyncError> {
        if self.registry.lookup_by_host_handle(document).is_some()
            || self.pending_opens.values().any(|p| p.document == document)
        {
            log::debug!("{} is already bound", document);
            return Ok(());
        }

        let mut content = TextBuffer::from_str(text);
        content.set_line_ending(LineEnding::detect(text, self.config.default_line_ending));
        let lines = content.lines();
        let id = self.next_id();
        log::info!("Creating engine buffer for {} ({})", document, name);
        self.pending_opens.insert(
            id,
            PendingOpen {
                document,
                name: name.clone(),
                content,
                closed: false,
            },
        );
        engine.send(EngineRequest::CreateBuffer { id, name, lines })
    }

    fn on_document_closed<E: EngineChannel>(
        &mut self,
        engine: &mut E,
        document: DocumentHandle,
    ) -> Result<(), SyncError> {
        for pending in self.pending_opens.values_mut() {
            if pending.document == document {
                pending.closed = true;
            }
        }

        let buffer = match self.registry.lookup_by_host_handle(document) {
            Some(binding) => binding.buffer,
            None => return Ok(()),
        };
        log::info!("{} closed in the host, closing {}", document, buffer);
        self.externals.forget_document(document);
        self.teardown(buffer);
        engine.send(EngineRequest::CloseBuffer { buffer })
    }

    /// Dispatches a content or selection event of a bound document.
    fn route_host<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        event: HostEvent,
    ) -> Result<(), SyncError> {
        let Some(token) = self.tokens.outstanding(buffer) else {
            return self.process_host(host, engine, buffer, event);
        };

        let route = match (&token.pending, &event) {
            (PendingEdit::Remote { before }, HostEvent::ContentChanged { changes, .. }) => {
                if self.is_host_echo(buffer, before, changes) {
                    Route::Echo
                } else {
                    Route::Defer
                }
            }
            // Carets the host moves while we rewrite its content follow the
            // engine, which reports its own cursor.
            (PendingEdit::Remote { .. } | PendingEdit::Resync { .. }, HostEvent::SelectionChanged { .. }) => {
                Route::Drop
            }
            _ => Route::Defer,
        };

        match route {
            Route::Echo => {
                log::debug!("Suppressed host echo for {}", buffer);
                self.tokens.consume(buffer);
                return self.drain(host, engine, buffer);
            }
            Route::Defer => self.defer(buffer, Deferred::Host(event)),
            Route::Drop => log::trace!("Dropping host selection for {} during engine edit", buffer),
        }
        Ok(())
    }

    fn is_host_echo(&self, buffer: BufferId, before: &TextBuffer, changes: &[HostChange]) -> bool {
        let Some(binding) = self.registry.lookup_by_engine_id(buffer) else {
            return false;
        };
        let mut candidate = before.clone();
        apply_host_changes(&mut candidate, changes, &self.mapper).is_ok() && candidate == binding.content
    }

    /// Handles a host event on an idle binding.
    fn process_host<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        event: HostEvent,
    ) -> Result<(), SyncError> {
        match event {
            HostEvent::ContentChanged { changes, .. } => self.host_content_changed(host, engine, buffer, &changes),
            HostEvent::SelectionChanged { selections, .. } => self.host_selection_changed(engine, buffer, &selections),
            other => {
                log::trace!("Unexpected deferred event {:?}", other);
                Ok(())
            }
        }
    }

    fn host_content_changed<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        changes: &[HostChange],
    ) -> Result<(), SyncError> {
        let mapper = self.mapper;
        let Some(binding) = self.registry.lookup_by_engine_id_mut(buffer) else {
            return Ok(());
        };
        let document = binding.document;

        if binding.external {
            log::warn!("{} mirrors {} and cannot be edited, reverting", document, buffer);
            return self.push_content_to_host(host, buffer);
        }

        let edits = match translate_host_changes(&binding.content, changes, &mapper) {
            Ok(translation) => {
                binding.content = translation.after;
                translation.edits
            }
            Err(TranslateError::OutOfRange { line, line_count }) => {
                log::warn!(
                    "Change on line {} of {} lines in {}, sending whole buffer",
                    line,
                    line_count,
                    document
                );
                let text = match host.document_text(document) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("Cannot read {}: {}", document, e);
                        return self.resync(engine, buffer);
                    }
                };
                let current = TextBuffer::from_str(&text);
                let edit = EngineEdit::replace_all(binding.content.len_lines(), current.lines());
                binding.content = current;
                vec![edit]
            }
        };
        if edits.is_empty() {
            return Ok(());
        }

        let revision = binding.bump_revision();
        self.tokens.issue(
            buffer,
            revision,
            PendingEdit::Local {
                expected: edits.iter().cloned().collect(),
                conflict: false,
            },
        );
        log::trace!("Sending {} edit(s) to {}", edits.len(), buffer);
        engine.send(EngineRequest::ApplyEdits { buffer, edits })
    }

    fn host_selection_changed<E: EngineChannel>(
        &mut self,
        engine: &mut E,
        buffer: BufferId,
        selections: &[HostSelection],
    ) -> Result<(), SyncError> {
        let Some(binding) = self.registry.lookup_by_engine_id(buffer) else {
            return Ok(());
        };
        if binding.external {
            return Ok(());
        }
        let Some(primary) = selections.first() else {
            return Ok(());
        };
        let active = primary.active;
        // Any host caret report supersedes the one we placed.
        if self.host_cursor_sent.remove(&buffer) == Some(active) {
            log::trace!("Ignoring echo of host caret for {}", buffer);
            return Ok(());
        }

        let line = active.line.min(binding.content.len_lines().saturating_sub(1));
        let line_text = binding.content.line_or_empty(line);
        let position = self
            .mapper
            .to_engine(HostPosition::new(line, active.character), &line_text);
        self.engine_cursor_sent.insert(buffer, position);
        engine.send(EngineRequest::SetCursor { buffer, position })
    }

    // Engine side

    fn on_engine_notification<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        notification: EngineNotification,
    ) -> Result<(), SyncError> {
        let buffer = notification.buffer();

        if let EngineNotification::BufferClosed { .. } = notification {
            return self.on_buffer_closed(host, buffer);
        }

        if self.registry.lookup_by_engine_id(buffer).is_none() {
            if let EngineNotification::BufferAttached { meta, lines, .. } = notification {
                return self.on_buffer_attached(host, engine, buffer, meta, lines);
            }
            if self.externals.is_unbindable(buffer) {
                log::debug!("Dropping notification for unbindable {}", buffer);
            } else {
                log::trace!("Ignoring notification for unbound {}", buffer);
            }
            return Ok(());
        }

        self.route_engine(host, engine, buffer, notification)
    }

    /// Dispatches a notification for a bound buffer.
    fn route_engine<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        notification: EngineNotification,
    ) -> Result<(), SyncError> {
        if let EngineNotification::BufferLines(event) = &notification {
            if let Some(binding) = self.registry.lookup_by_engine_id(buffer) {
                if binding.is_stale(event.changedtick) {
                    let stale = SyncError::StaleRevision {
                        buffer,
                        got: event.changedtick,
                        current: binding.engine_tick.unwrap_or_default(),
                    };
                    log::debug!("{}", stale);
                    return Ok(());
                }
            }
        }

        let Some(token) = self.tokens.outstanding_mut(buffer) else {
            return self.process_engine(host, engine, buffer, notification);
        };

        if let (PendingEdit::Local { expected, conflict }, EngineNotification::BufferLines(event)) =
            (&mut token.pending, &notification)
        {
            if expected.front().map_or(false, |edit| event.echoes(edit)) {
                expected.pop_front();
                let done = expected.is_empty();
                let conflict = *conflict;
                log::debug!("Suppressed engine echo for {}", buffer);
                if let Some(binding) = self.registry.lookup_by_engine_id_mut(buffer) {
                    binding.observe_tick(event.changedtick);
                }
                if done {
                    return self.finish_local(host, engine, buffer, conflict);
                }
                return Ok(());
            }
            log::debug!("Concurrent engine change on {} while a host edit is in flight", buffer);
            *conflict = true;
        }

        self.defer(buffer, Deferred::Engine(notification));
        Ok(())
    }

    /// Clears a local token whose echoes all came back.
    fn finish_local<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        conflict: bool,
    ) -> Result<(), SyncError> {
        self.tokens.consume(buffer);
        if conflict {
            if let Some(queue) = self.queues.get_mut(&buffer) {
                let before = queue.len();
                queue.retain(|d| !matches!(d, Deferred::Engine(EngineNotification::BufferLines(_))));
                log::debug!(
                    "Dropped {} superseded engine update(s) for {}",
                    before - queue.len(),
                    buffer
                );
            }
            return self.resync(engine, buffer);
        }
        self.drain(host, engine, buffer)
    }

    /// Handles a notification on an idle binding.
    fn process_engine<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        notification: EngineNotification,
    ) -> Result<(), SyncError> {
        match notification {
            EngineNotification::BufferLines(event) => self.engine_lines(host, engine, buffer, &event),
            EngineNotification::CursorMoved { position, .. } => {
                self.engine_cursor_moved(host, buffer, position);
                Ok(())
            }
            EngineNotification::BufferAttached { lines, .. } => {
                let Some(binding) = self.registry.lookup_by_engine_id_mut(buffer) else {
                    return Ok(());
                };
                if binding.content.lines() == lines {
                    return Ok(());
                }
                log::debug!("{} reattached with different content", buffer);
                binding.content = TextBuffer::from_lines(&lines, binding.content.line_ending());
                binding.bump_revision();
                self.push_content_to_host(host, buffer)
            }
            EngineNotification::BufferClosed { .. } => self.on_buffer_closed(host, buffer),
        }
    }

    fn engine_lines<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        event: &BufferLinesEvent,
    ) -> Result<(), SyncError> {
        let mapper = self.mapper;
        let Some(binding) = self.registry.lookup_by_engine_id_mut(buffer) else {
            return Ok(());
        };
        if !binding.observe_tick(event.changedtick) {
            let stale = SyncError::StaleRevision {
                buffer,
                got: event.changedtick,
                current: binding.engine_tick.unwrap_or_default(),
            };
            log::debug!("{}", stale);
            return Ok(());
        }

        let before = binding.content.clone();
        let host_edits = translate_engine_lines(&before, event, &mapper);
        let edit = event.to_edit(before.len_lines());
        binding
            .content
            .replace_lines(edit.start_line, edit.end_line, &edit.lines);
        if binding.content == before {
            return Ok(());
        }

        let document = binding.document;
        let revision = binding.bump_revision();
        self.tokens.issue(buffer, revision, PendingEdit::Remote { before });
        if let Err(e) = host.apply_edits(document, &host_edits) {
            log::warn!("Host rejected edit to {}: {}", document, e);
            return self.resync(engine, buffer);
        }
        Ok(())
    }

    fn engine_cursor_moved<H: HostEditor>(&mut self, host: &mut H, buffer: BufferId, position: EnginePosition) {
        // The engine may clamp the cursor we sent; whatever it reports
        // next is its answer.
        if self.engine_cursor_sent.remove(&buffer) == Some(position) {
            log::trace!("Ignoring echo of engine cursor for {}", buffer);
            return;
        }
        let Some(binding) = self.registry.lookup_by_engine_id(buffer) else {
            return;
        };
        if binding.external && host.active_document() != Some(binding.document) {
            log::trace!("{} is not in the active view, skipping cursor", binding.document);
            return;
        }

        let line_text = binding.content.line_or_empty(position.line);
        let caret = self.mapper.to_host(position, &line_text);
        let document = binding.document;
        self.host_cursor_sent.insert(buffer, caret);
        if let Err(e) = host.set_selections(document, &[HostSelection::caret(caret)]) {
            log::warn!("Cannot move caret in {}: {}", document, e);
        }
    }

    fn on_buffer_attached<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        meta: BufferMeta,
        lines: Vec<String>,
    ) -> Result<(), SyncError> {
        let content = TextBuffer::from_lines(&lines, self.config.default_line_ending);
        let complete = meta.line_count == lines.len();

        match ExternalBufferManager::classify(&meta) {
            Classification::FileBacked => {
                // Our own create request may be answered after the attach.
                let pending = self
                    .pending_opens
                    .iter()
                    .find(|(_, p)| !p.closed && p.name == meta.name)
                    .map(|(id, _)| *id);
                if let Some(id) = pending {
                    if let Some(open) = self.pending_opens.remove(&id) {
                        return self.complete_open(host, engine, open, buffer);
                    }
                }

                let document = match host.open_file_document(&meta.name, &content.to_string()) {
                    Ok(document) => document,
                    Err(e) => {
                        log::warn!("Host cannot open {}: {}", meta.name, e);
                        return Ok(());
                    }
                };
                log::info!("Bound {} ({}) to {}", buffer, meta.name, document);
                self.bind(buffer, document, false, content);
                // The host may already have had the file open.
                self.push_content_to_host(host, buffer)?;
            }
            Classification::External { .. } => {
                let descriptor = self.externals.open(host, buffer, &meta, &content)?;
                self.bind(buffer, descriptor.document, true, content);
            }
            Classification::Unbindable { .. } => {
                self.externals.mark_unbindable(buffer);
                let unbindable = SyncError::UnbindableBuffer {
                    buffer,
                    buftype: meta.buftype,
                };
                log::warn!("{}", unbindable);
                return Ok(());
            }
        }

        if !complete {
            log::debug!(
                "{} attached with {} of {} lines, fetching",
                buffer,
                lines.len(),
                meta.line_count
            );
            return self.resync(engine, buffer);
        }
        Ok(())
    }

    fn on_buffer_closed<H: HostEditor>(&mut self, host: &mut H, buffer: BufferId) -> Result<(), SyncError> {
        let external = self
            .registry
            .lookup_by_engine_id(buffer)
            .map_or(false, |b| b.external);
        if external || self.externals.is_unbindable(buffer) {
            self.externals.close(host, buffer);
        }
        if self.registry.lookup_by_engine_id(buffer).is_some() {
            log::info!("{} closed in the engine", buffer);
        }
        self.teardown(buffer);
        Ok(())
    }

    // Replies

    fn on_reply<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        reply: EngineReply,
    ) -> Result<(), SyncError> {
        match reply {
            EngineReply::BufferCreated { id, buffer } => {
                let Some(open) = self.pending_opens.remove(&id) else {
                    log::trace!("Reply {} has no pending open", id);
                    return Ok(());
                };
                if open.closed {
                    log::debug!("{} closed before {} was created", open.document, buffer);
                    return engine.send(EngineRequest::CloseBuffer { buffer });
                }
                self.complete_open(host, engine, open, buffer)
            }
            EngineReply::Lines {
                id,
                buffer,
                changedtick,
                lines,
            } => {
                if self.tokens.find_resync(id) != Some(buffer) {
                    log::debug!("Discarding lines reply {} for {}", id, buffer);
                    return Ok(());
                }
                self.complete_resync(host, engine, buffer, changedtick, lines)
            }
            EngineReply::Error { id, message } => {
                if let Some(open) = self.pending_opens.remove(&id) {
                    log::warn!("Engine could not create a buffer for {}: {}", open.document, message);
                    return Ok(());
                }
                match self.tokens.find_resync(id) {
                    Some(buffer) => {
                        log::warn!("Resync of {} failed: {}", buffer, message);
                        self.tokens.consume(buffer);
                        self.drain(host, engine, buffer)
                    }
                    None => {
                        log::warn!("Engine request {} failed: {}", id, message);
                        Ok(())
                    }
                }
            }
        }
    }

    fn complete_open<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        open: PendingOpen,
        buffer: BufferId,
    ) -> Result<(), SyncError> {
        log::info!("Bound {} ({}) to {}", open.document, open.name, buffer);
        self.bind(buffer, open.document, false, open.content);
        self.reconcile_with_host(host, engine, buffer)
    }

    /// Pushes the host's current text to the engine if it differs from the
    /// binding's content.
    fn reconcile_with_host<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
    ) -> Result<(), SyncError> {
        let Some(binding) = self.registry.lookup_by_engine_id_mut(buffer) else {
            return Ok(());
        };
        let text = match host.document_text(binding.document) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Cannot read {}: {}", binding.document, e);
                return Ok(());
            }
        };
        let current = TextBuffer::from_str(&text);
        if current == binding.content {
            return Ok(());
        }

        log::debug!("{} changed before binding, replacing {}", binding.document, buffer);
        let edit = EngineEdit::replace_all(binding.content.len_lines(), current.lines());
        binding.content = current;
        let revision = binding.bump_revision();
        self.tokens.issue(
            buffer,
            revision,
            PendingEdit::Local {
                expected: VecDeque::from(vec![edit.clone()]),
                conflict: false,
            },
        );
        engine.send(EngineRequest::ApplyEdits {
            buffer,
            edits: vec![edit],
        })
    }

    fn complete_resync<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
        changedtick: u64,
        lines: Vec<String>,
    ) -> Result<(), SyncError> {
        self.tokens.consume(buffer);
        // The engine content supersedes host edits made during the fetch.
        if let Some(queue) = self.queues.get_mut(&buffer) {
            queue.retain(|d| !matches!(d, Deferred::Host(HostEvent::ContentChanged { .. })));
        }

        let Some(binding) = self.registry.lookup_by_engine_id_mut(buffer) else {
            return Ok(());
        };
        binding.engine_tick = Some(changedtick);
        binding.content = TextBuffer::from_lines(&lines, binding.content.line_ending());
        binding.bump_revision();

        if let Err(e) = self.push_content_to_host(host, buffer) {
            log::warn!("Cannot refresh host after resync of {}: {}", buffer, e);
        }
        if self.tokens.outstanding(buffer).is_none() {
            return self.drain(host, engine, buffer);
        }
        Ok(())
    }

    /// Makes the host document match the binding's content with one
    /// whole-document edit, skipped when they already agree.
    fn push_content_to_host<H: HostEditor>(
        &mut self,
        host: &mut H,
        buffer: BufferId,
    ) -> Result<(), SyncError> {
        let mapper = self.mapper;
        let Some(binding) = self.registry.lookup_by_engine_id(buffer) else {
            return Ok(());
        };
        let document = binding.document;
        let text = host.document_text(document)?;
        let mut current = TextBuffer::from_str(&text);
        current.set_line_ending(binding.content.line_ending());
        if current == binding.content {
            log::debug!("{} already matches {}", document, buffer);
            return Ok(());
        }

        let (_, host_edit) = full_replace(&current, binding.content.lines(), &mapper);
        let revision = binding.revision;
        self.tokens.issue(buffer, revision, PendingEdit::Remote { before: current });
        if let Err(e) = host.apply_edits(document, &[host_edit]) {
            log::warn!("Host rejected replacement of {}: {}", document, e);
            self.tokens.consume(buffer);
        }
        Ok(())
    }

    // Queues

    fn defer(&mut self, buffer: BufferId, event: Deferred) {
        let queue = self.queues.entry(buffer).or_default();
        if event.is_cursor() {
            // Only the latest cursor of each side matters.
            queue.retain(|d| !(d.is_cursor() && d.same_side(&event)));
        }
        log::trace!("Deferring event for {} ({} queued)", buffer, queue.len() + 1);
        queue.push_back(event);
    }

    /// Replays queued events of `buffer` until one of them places a token.
    fn drain<H: HostEditor, E: EngineChannel>(
        &mut self,
        host: &mut H,
        engine: &mut E,
        buffer: BufferId,
    ) -> Result<(), SyncError> {
        while self.tokens.outstanding(buffer).is_none() {
            let Some(event) = self.queues.get_mut(&buffer).and_then(|q| q.pop_front()) else {
                break;
            };
            let result = match event {
                Deferred::Host(event) => self.process_host(host, engine, buffer, event),
                Deferred::Engine(notification) => self.route_engine(host, engine, buffer, notification),
            };
            match result {
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::warn!("{}", e),
                Ok(()) => {}
            }
        }
        if self.queues.get(&buffer).map_or(false, |q| q.is_empty()) {
            self.queues.remove(&buffer);
        }
        Ok(())
    }

    /// Binds `buffer` to `document`. A different buffer that held the
    /// document is torn down first.
    fn bind(&mut self, buffer: BufferId, document: DocumentHandle, external: bool, content: TextBuffer) {
        let displaced = self
            .registry
            .lookup_by_host_handle(document)
            .map(|b| b.buffer)
            .filter(|&previous| previous != buffer);
        if let Some(previous) = displaced {
            log::info!("{} now shows {}, dropping {}", document, buffer, previous);
            self.teardown(previous);
        }
        self.registry.bind(buffer, document, external, content);
    }

    /// Drops the binding of `buffer` with its token, queue and cursor state.
    fn teardown(&mut self, buffer: BufferId) {
        self.tokens.cancel(buffer);
        self.queues.remove(&buffer);
        self.host_cursor_sent.remove(&buffer);
        self.engine_cursor_sent.remove(&buffer);
        self.registry.unbind(buffer);
    }
}
