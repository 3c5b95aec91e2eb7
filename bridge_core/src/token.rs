//! Pending edit tokens.
//!
//! A token is placed right before the sync engine applies an edit to one
//! side and is consumed when the matching echo comes back from that side.
//! While it is outstanding, its binding is not idle: matching echoes are
//! swallowed and everything else waits in the binding's queue.

use crate::buffer::TextBuffer;
use crate::engine::{BufferId, EngineEdit, RequestId};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Identifies a token: the binding and the revision it was issued at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub buffer: BufferId,
    pub revision: u64,
}

/// What a token is waiting for.
#[derive(Debug, Clone)]
pub enum PendingEdit {
    /// Edits sent to the engine; each comes back as one buffer update, in
    /// order.
    Local {
        expected: VecDeque<EngineEdit>,
        /// An engine update that was not ours arrived in the window.
        conflict: bool,
    },
    /// Edits applied to the host; the echo is any change that turns
    /// `before` into the binding's current content.
    Remote { before: TextBuffer },
    /// A full-content fetch from the engine.
    Resync { request: RequestId },
}

/// An outstanding token.
#[derive(Debug, Clone)]
pub struct PendingEditToken {
    pub key: TokenKey,
    pub issued_at: Instant,
    pub pending: PendingEdit,
}

impl PendingEditToken {
    /// Returns true if the token is older than `timeout` at `now`.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.issued_at) > timeout
    }
}

/// Outstanding tokens, at most one per binding.
#[derive(Debug, Default)]
pub struct TokenTable {
    tokens: HashMap<TokenKey, PendingEditToken>,
    by_buffer: HashMap<BufferId, TokenKey>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a token for `buffer` at `revision`, replacing any token the
    /// binding still had.
    pub fn issue(&mut self, buffer: BufferId, revision: u64, pending: PendingEdit) -> TokenKey {
        let key = TokenKey { buffer, revision };
        if let Some(old) = self.by_buffer.insert(buffer, key) {
            log::debug!("Replacing token {:?} for {}", old, buffer);
            self.tokens.remove(&old);
        }
        self.tokens.insert(
            key,
            PendingEditToken {
                key,
                issued_at: Instant::now(),
                pending,
            },
        );
        key
    }

    /// The token outstanding for `buffer`.
    pub fn outstanding(&self, buffer: BufferId) -> Option<&PendingEditToken> {
        self.by_buffer.get(&buffer).and_then(|key| self.tokens.get(key))
    }

    pub fn outstanding_mut(&mut self, buffer: BufferId) -> Option<&mut PendingEditToken> {
        let key = self.by_buffer.get(&buffer)?;
        self.tokens.get_mut(key)
    }

    /// Removes and returns the token outstanding for `buffer`.
    pub fn consume(&mut self, buffer: BufferId) -> Option<PendingEditToken> {
        let key = self.by_buffer.remove(&buffer)?;
        self.tokens.remove(&key)
    }

    /// Finds the binding whose resync token waits for `request`.
    pub fn find_resync(&self, request: RequestId) -> Option<BufferId> {
        self.tokens.values().find_map(|token| match token.pending {
            PendingEdit::Resync { request: r } if r == request => Some(token.key.buffer),
            _ => None,
        })
    }

    /// Keys of the tokens older than `timeout` at `now`, oldest first.
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<TokenKey> {
        let mut expired: Vec<&PendingEditToken> = self
            .tokens
            .values()
            .filter(|token| token.is_expired(now, timeout))
            .collect();
        expired.sort_by_key(|token| token.issued_at);
        expired.into_iter().map(|token| token.key).collect()
    }

    /// Drops the token of `buffer`, if any. Returns true if one was dropped.
    pub fn cancel(&mut self, buffer: BufferId) -> bool {
        self.consume(buffer).is_some()
    }

    /// Drops every token.
    pub fn clear(&mut self) {
        self.tokens.clear();
        self.by_buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> PendingEdit {
        PendingEdit::Local {
            expected: VecDeque::new(),
            conflict: false,
        }
    }

    #[test]
    fn test_issue_and_consume() {
        let mut table = TokenTable::new();
        let key = table.issue(BufferId(1), 3, local());
        assert_eq!(key, TokenKey { buffer: BufferId(1), revision: 3 });
        assert!(table.outstanding(BufferId(1)).is_some());
        assert!(table.outstanding(BufferId(2)).is_none());

        let token = table.consume(BufferId(1)).unwrap();
        assert_eq!(token.key.revision, 3);
        assert!(table.is_empty());
        assert!(table.consume(BufferId(1)).is_none());
    }

    #[test]
    fn test_one_token_per_binding() {
        let mut table = TokenTable::new();
        table.issue(BufferId(1), 1, local());
        table.issue(BufferId(1), 2, PendingEdit::Resync { request: 9 });
        assert_eq!(table.len(), 1);
        assert_eq!(table.outstanding(BufferId(1)).unwrap().key.revision, 2);
        assert_eq!(table.find_resync(9), Some(BufferId(1)));
        assert_eq!(table.find_resync(8), None);
    }

    #[test]
    fn test_expired_tokens() {
        let mut table = TokenTable::new();
        table.issue(BufferId(1), 1, local());
        table.issue(BufferId(2), 1, local());
        let now = Instant::now();

        assert!(table.expired(now, Duration::from_secs(60)).is_empty());
        let later = now + Duration::from_secs(61);
        assert_eq!(table.expired(later, Duration::from_secs(60)).len(), 2);
    }

    #[test]
    fn test_cancel_only_touches_one_binding() {
        let mut table = TokenTable::new();
        table.issue(BufferId(1), 1, local());
        table.issue(BufferId(2), 1, local());
        assert!(table.cancel(BufferId(1)));
        assert!(!table.cancel(BufferId(1)));
        assert!(table.outstanding(BufferId(2)).is_some());
    }
}
