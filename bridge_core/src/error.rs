//! Error taxonomy of the synchronization core.

use crate::engine::BufferId;
use crate::host::HostError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while synchronizing.
///
/// Only [`SyncError::TransportFailure`] leaves [`SyncEngine::handle`]; the
/// rest are logged and resolved by the engine itself, usually by a forced
/// resync of the affected binding.
///
/// [`SyncEngine::handle`]: crate::sync::SyncEngine::handle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// A notification refers to an engine revision older than the binding's.
    #[error("stale update for {buffer}: changedtick {got} <= {current}")]
    StaleRevision {
        buffer: BufferId,
        got: u64,
        current: u64,
    },

    /// A pending edit token was never acknowledged.
    #[error("no echo for {buffer} revision {revision} within {timeout:?}")]
    EchoTimeout {
        buffer: BufferId,
        revision: u64,
        timeout: Duration,
    },

    /// The engine reported a buffer kind the host cannot represent.
    #[error("{buffer} has buffer type '{buftype}' which cannot be shown in the host")]
    UnbindableBuffer { buffer: BufferId, buftype: String },

    /// The channel to the engine failed.
    #[error("engine transport failure: {0}")]
    TransportFailure(String),

    /// The host rejected an API call.
    #[error("host error: {0}")]
    Host(#[from] HostError),
}

impl SyncError {
    /// Whether the error must be surfaced to the owner of the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::TransportFailure(_))
    }
}
