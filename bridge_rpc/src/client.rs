//! Engine client - Manages the engine process and communication.
//!
//! The client runs on a separate tokio runtime thread. Requests from the
//! sync engine go in through an [`EngineHandle`]; notifications and replies
//! come back, in wire order, as [`ClientEvent`]s on a crossbeam channel.

use crate::messages::{self, Outbound};
use crate::transport::{self, AsyncTransport, JsonRpcMessage, JsonRpcResponse};
use crossbeam_channel::{Receiver, Sender};
use modal_bridge_core::{BufferId, EngineChannel, EngineReply, EngineRequest, RequestId, SyncError, SyncEvent};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// How long the engine gets to exit on its own after its stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Engine process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Command to start the engine.
    pub command: String,
    /// Arguments to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
        }
    }
}

/// Events delivered by the client thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A notification or reply for the sync engine.
    Sync(SyncEvent),
    /// The engine process is gone; no further events follow.
    Exited { code: Option<i32> },
}

/// Internal message for the write task.
enum Outgoing {
    Request(EngineRequest),
    Shutdown,
}

/// Handle for sending requests to the engine.
#[derive(Clone)]
pub struct EngineHandle {
    request_tx: mpsc::UnboundedSender<Outgoing>,
}

impl EngineChannel for EngineHandle {
    fn send(&mut self, request: EngineRequest) -> Result<(), SyncError> {
        self.request_tx
            .send(Outgoing::Request(request))
            .map_err(|_| SyncError::TransportFailure("engine client has stopped".to_string()))
    }
}

/// The engine client.
pub struct EngineClient {
    handle: EngineHandle,
    event_rx: Receiver<ClientEvent>,
    running: Arc<AtomicBool>,
}

impl EngineClient {
    /// Starts the engine process described by `config`.
    ///
    /// A process that fails to start is reported as
    /// [`ClientEvent::Exited`] rather than as an error here.
    pub fn start(config: EngineConfig) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        thread::Builder::new()
            .name("engine-client".to_string())
            .spawn(move || {
                let code = match tokio::runtime::Runtime::new() {
                    Ok(rt) => rt.block_on(async {
                        run_client(config, request_rx, event_tx.clone(), running_clone.clone())
                            .await
                            .unwrap_or_else(|e| {
                                log::error!("Engine client error: {}", e);
                                None
                            })
                    }),
                    Err(e) => {
                        log::error!("Failed to create tokio runtime: {}", e);
                        None
                    }
                };
                running_clone.store(false, Ordering::SeqCst);
                let _ = event_tx.send(ClientEvent::Exited { code });
            })?;

        Ok(Self {
            handle: EngineHandle { request_tx },
            event_rx,
            running,
        })
    }

    /// Returns a handle for sending requests.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Tries to receive an event (non-blocking).
    pub fn try_recv(&self) -> Option<ClientEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Waits up to `timeout` for an event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ClientEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Returns whether the engine is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Closes the engine's input; the engine is expected to exit.
    pub fn shutdown(&self) {
        let _ = self.handle.request_tx.send(Outgoing::Shutdown);
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pending request info.
struct PendingRequest {
    method: &'static str,
    original_id: RequestId,
    buffer: Option<BufferId>,
}

type PendingMap = Arc<tokio::sync::Mutex<HashMap<transport::RequestId, PendingRequest>>>;

/// Runs the client loop until either pipe closes. Returns the engine's exit
/// code when it has one.
async fn run_client(
    config: EngineConfig,
    mut request_rx: mpsc::UnboundedReceiver<Outgoing>,
    event_tx: Sender<ClientEvent>,
    running: Arc<AtomicBool>,
) -> std::io::Result<Option<i32>> {
    // Start the engine process
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref dir) = config.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            log::error!("Failed to start engine '{}': {}", config.command, e);
            return Err(e);
        }
    };

    log::info!("Started engine: {}", config.command);

    let stdin = child.stdin.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Failed to get engine stdin")
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Failed to get engine stdout")
    })?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("engine: {}", line);
            }
        });
    }

    let (mut transport_read, mut transport_write) = AsyncTransport::new(stdout, stdin).split();
    let pending: PendingMap = Arc::new(tokio::sync::Mutex::new(HashMap::new()));

    // Spawn write task
    let write_pending = pending.clone();
    let mut write_task = tokio::spawn(async move {
        let mut next_id: i64 = 1;
        while let Some(outgoing) = request_rx.recv().await {
            let request = match outgoing {
                Outgoing::Request(request) => request,
                Outgoing::Shutdown => break,
            };
            let outbound = match messages::encode_request(&request) {
                Ok(outbound) => outbound,
                Err(e) => {
                    log::error!("Failed to encode {:?}: {}", request, e);
                    continue;
                }
            };
            let result = match outbound {
                Outbound::Request {
                    id,
                    method,
                    params,
                    buffer,
                } => {
                    let rpc_id = next_id;
                    next_id += 1;
                    write_pending.lock().await.insert(
                        transport::RequestId::Number(rpc_id),
                        PendingRequest {
                            method,
                            original_id: id,
                            buffer,
                        },
                    );
                    transport_write.send_request(rpc_id, method, Some(params)).await
                }
                Outbound::Notification { method, params } => {
                    transport_write.send_notification(method, Some(params)).await
                }
            };
            if let Err(e) = result {
                log::error!("Failed to write to engine: {}", e);
                break;
            }
        }
    });

    // Spawn read task
    let read_running = running.clone();
    let mut read_task = tokio::spawn(async move {
        loop {
            match transport_read.read_message().await {
                Ok(msg) => handle_engine_message(msg, &pending, &event_tx).await,
                Err(e) => {
                    if read_running.load(Ordering::SeqCst) {
                        log::error!("Error reading from engine: {}", e);
                    }
                    break;
                }
            }
        }
    });

    // Whichever side stops first ends the session. Dropping the writer
    // closes the engine's stdin.
    tokio::select! {
        _ = &mut write_task => log::debug!("Engine writer finished"),
        _ = &mut read_task => log::debug!("Engine reader finished"),
    }
    running.store(false, Ordering::SeqCst);
    write_task.abort();

    let status = match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            log::warn!("Failed to wait for engine: {}", e);
            None
        }
        Err(_) => {
            log::warn!("Engine did not exit within {:?}, killing it", EXIT_GRACE);
            let _ = child.kill().await;
            None
        }
    };
    read_task.abort();

    log::info!("Engine client shut down");
    Ok(status.and_then(|status| status.code()))
}

/// Handles a message from the engine.
async fn handle_engine_message(msg: Value, pending: &PendingMap, event_tx: &Sender<ClientEvent>) {
    let event = match transport::parse_message(&msg) {
        Some(JsonRpcMessage::Response(resp)) => handle_response(resp, pending).await.map(SyncEvent::Reply),
        Some(JsonRpcMessage::Notification(notif)) => {
            messages::decode_notification(&notif.method, notif.params).map(SyncEvent::Engine)
        }
        Some(JsonRpcMessage::Request(req)) => {
            log::debug!("Engine request: {} (id: {:?})", req.method, req.id);
            None
        }
        None => {
            log::warn!("Unrecognized message from engine: {}", msg);
            None
        }
    };

    if let Some(event) = event {
        let _ = event_tx.send(ClientEvent::Sync(event));
    }
}

/// Handles a response from the engine.
async fn handle_response(resp: JsonRpcResponse, pending: &PendingMap) -> Option<EngineReply> {
    let pending_req = {
        let mut pending = pending.lock().await;
        pending.remove(&resp.id)
    };

    let Some(req_info) = pending_req else {
        log::warn!("Received response for unknown request: {:?}", resp.id);
        return None;
    };

    if let Some(error) = resp.error {
        return Some(EngineReply::Error {
            id: req_info.original_id,
            message: error.message,
        });
    }

    messages::decode_result(req_info.method, req_info.original_id, req_info.buffer, resp.result)
}
