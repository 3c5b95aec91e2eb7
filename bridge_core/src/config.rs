//! Synchronization settings.
//!
//! Loading settings is the host's business; the host deserializes a
//! [`SyncConfig`] from wherever it keeps them and hands it to
//! [`SyncEngine::new`](crate::sync::SyncEngine::new).

use crate::buffer::LineEnding;
use crate::mapper::HostUnit;
use serde::Deserialize;
use std::time::Duration;

/// Default time to wait for an echo before forcing a resync.
const DEFAULT_ECHO_TIMEOUT_MS: u64 = 1500;

/// Settings for a [`SyncEngine`](crate::sync::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a pending edit token may stay unacknowledged.
    pub echo_timeout_ms: u64,
    /// Unit the host counts columns in.
    pub host_unit: HostUnit,
    /// Line ending used for documents created from engine content when
    /// nothing else decides it.
    pub default_line_ending: LineEnding,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_timeout_ms: DEFAULT_ECHO_TIMEOUT_MS,
            host_unit: HostUnit::Utf16,
            default_line_ending: LineEnding::Lf,
        }
    }
}

impl SyncConfig {
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    /// Returns a copy with a different echo timeout.
    pub fn with_echo_timeout(mut self, timeout: Duration) -> Self {
        self.echo_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Returns a copy with a different host unit.
    pub fn with_host_unit(mut self, unit: HostUnit) -> Self {
        self.host_unit = unit;
        self
    }
}
