//! Modal Bridge - Headless host driving an engine process.
//!
//! Usage: modal-bridge-headless [--config FILE.json] FILE -- ENGINE [ARGS...]
//!
//! Opens FILE in an in-memory host, mirrors it into the engine and keeps
//! both in sync until the engine exits. The final host content is written
//! to stdout.

use modal_bridge_core::{MemoryHost, SyncConfig, SyncEngine, SyncError, SyncEvent};
use modal_bridge_rpc::{ClientEvent, EngineClient, EngineConfig, EngineHandle};
use serde::Deserialize;
use std::env;
use std::process::ExitCode;
use std::time::{Duration, Instant};

/// How long to wait for engine events before checking timers.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const USAGE: &str = "usage: modal-bridge-headless [--config FILE.json] FILE -- ENGINE [ARGS...]";

/// Settings file contents.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HeadlessConfig {
    sync: SyncConfig,
    engine: Option<EngineConfig>,
}

struct Args {
    config: Option<String>,
    file: String,
    engine: Vec<String>,
}

fn parse_args(args: &[String]) -> Option<Args> {
    let split = args.iter().position(|arg| arg == "--");
    let (ours, engine) = match split {
        Some(index) => (&args[..index], args[index + 1..].to_vec()),
        None => (args, Vec::new()),
    };

    let mut config = None;
    let mut file = None;
    let mut iter = ours.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            config = Some(iter.next()?.clone());
        } else if file.is_none() {
            file = Some(arg.clone());
        } else {
            return None;
        }
    }

    Some(Args {
        config,
        file: file?,
        engine,
    })
}

fn load_config(path: Option<&str>) -> Result<HeadlessConfig, String> {
    let Some(path) = path else {
        return Ok(HeadlessConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {}", path, e))
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(args) = parse_args(&args) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load config {}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine_config = match (args.engine.split_first(), config.engine) {
        (Some((command, rest)), _) => EngineConfig::new(command.clone(), rest.to_vec()),
        (None, Some(engine)) => engine,
        (None, None) => {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    let text = match std::fs::read_to_string(&args.file) {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to open file '{}': {}", args.file, e);
            return ExitCode::FAILURE;
        }
    };

    let client = match EngineClient::start(engine_config) {
        Ok(client) => client,
        Err(e) => {
            log::error!("Failed to start engine client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut host = MemoryHost::with_unit(config.sync.host_unit);
    let mut sync = SyncEngine::new(config.sync);
    let mut engine = client.handle();
    let document = host.open_document(&args.file, &text);

    log::info!("Syncing {}", args.file);
    let result = run(&client, &mut sync, &mut host, &mut engine);
    sync.shutdown(&mut host);
    client.shutdown();

    if let Some(text) = host.text(document) {
        print!("{}", text);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Pumps host and engine events into the sync engine until the engine
/// exits.
fn run(
    client: &EngineClient,
    sync: &mut SyncEngine,
    host: &mut MemoryHost,
    engine: &mut EngineHandle,
) -> Result<(), SyncError> {
    loop {
        // Host events include the echoes of edits the sync engine just made.
        while host.has_events() {
            for event in host.take_events() {
                sync.handle(host, engine, SyncEvent::Host(event))?;
            }
        }

        match client.recv_timeout(POLL_INTERVAL) {
            Some(ClientEvent::Sync(event)) => sync.handle(host, engine, event)?,
            Some(ClientEvent::Exited { code }) => {
                log::info!("Engine exited with {:?}", code);
                return Ok(());
            }
            None => {}
        }

        sync.expire_tokens(host, engine, Instant::now())?;
    }
}
