//! Modal Bridge Core - Host/engine buffer synchronization.
//!
//! This crate keeps the documents of a host text editor and the buffers of
//! an embedded modal editing engine in step. It is a synchronous state
//! machine with no I/O of its own: the host is reached through the
//! [`HostEditor`] trait, the engine through [`EngineChannel`], and every
//! reaction from either side comes back as a [`SyncEvent`].

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod external;
pub mod host;
pub mod mapper;
pub mod memory;
pub mod registry;
pub mod sync;
pub mod token;
pub mod translate;

pub use buffer::{LineEnding, TextBuffer};
pub use config::SyncConfig;
pub use engine::{
    BufferId, BufferLinesEvent, BufferMeta, EngineChannel, EngineEdit, EngineNotification,
    EngineReply, EngineRequest, RequestId,
};
pub use error::SyncError;
pub use external::{BufferKind, ExternalBufferDescriptor, ExternalBufferManager};
pub use host::{
    DocumentHandle, HostChange, HostEdit, HostEditor, HostError, HostEvent, HostRange,
    HostSelection,
};
pub use mapper::{CoordinateMapper, EnginePosition, HostPosition, HostUnit};
pub use memory::MemoryHost;
pub use registry::{Binding, BufferRegistry};
pub use sync::{BindingState, SyncEngine, SyncEvent};
pub use token::{PendingEdit, PendingEditToken, TokenKey, TokenTable};
