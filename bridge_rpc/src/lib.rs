//! Modal Bridge RPC - JSON-RPC channel to the engine process.
//!
//! The engine runs as a child process speaking `Content-Length` framed
//! JSON-RPC over stdio. All I/O happens on a separate thread; the sync
//! engine talks to it through an [`EngineHandle`] and reads its events from
//! the [`EngineClient`].

pub mod client;
pub mod messages;
pub mod transport;

pub use client::{ClientEvent, EngineClient, EngineConfig, EngineHandle};
pub use messages::Outbound;
