//! Audit collector daemon
//!
//! Receives audit events from hooked processes over a Unix socket and appends them to
//! the access log:
//! - TOML configuration with environment overrides
//! - Newline-delimited JSON IPC with `Ping`, `GetStats` and `ClearLog` control requests
//! - Size-capped access log with filtered, paged queries

pub mod access_log;
pub mod config;
pub mod ipc;
pub mod logging;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::signal;

use crate::constants::{APP_SUBSYSTEM, COLLECTOR_CATEGORY};
use crate::daemon::access_log::AccessLog;
use crate::daemon::config::CollectorConfiguration;
use crate::daemon::ipc::{parse_line, CollectorStats, IpcMessage, IpcResponse, IpcServer};
use crate::daemon::logging::{CollectorLogger, LogLevel};
use crate::models::AuditEvent;

/// Collector runtime state shared by all connections
pub struct CollectorState {
    log: Mutex<AccessLog>,
    logger: CollectorLogger,
    started: Instant,
    events_received: AtomicU64,
    events_written: AtomicU64,
    parse_errors: AtomicU64,
    trims: AtomicU64,
}

impl CollectorState {
    pub fn new(log: AccessLog, logger: CollectorLogger) -> Self {
        Self {
            log: Mutex::new(log),
            logger,
            started: Instant::now(),
            events_received: AtomicU64::new(0),
            events_written: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            trims: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CollectorStats {
        let log = self.log.lock();
        CollectorStats {
            pid: std::process::id(),
            uptime_seconds: self.started.elapsed().as_secs(),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            trims: self.trims.load(Ordering::Relaxed),
            log_path: log.path().to_path_buf(),
            log_size_bytes: log.size(),
            max_log_bytes: log.max_bytes(),
            app_count: log.stats().map(|s| s.app_count).unwrap_or_else(|e| {
                warn!("Failed to read access log statistics: {:#}", e);
                0
            }),
        }
    }

    /// Stamp and persist one event
    fn record(&self, mut event: AuditEvent) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        if event.ts == 0 {
            event.ts = chrono::Utc::now().timestamp_millis();
        }

        let log = self.log.lock();
        match log.append(&event) {
            Ok(trimmed) => {
                self.events_written.fetch_add(1, Ordering::Relaxed);
                if let Some(kept) = trimmed {
                    self.trims.fetch_add(1, Ordering::Relaxed);
                    self.logger.log_trim(log.path(), kept);
                }
            }
            Err(e) => self.logger.log_error(&format!("{:#}", e), Some("append")),
        }
    }

    /// Handle one message; `None` for messages that are not answered
    pub fn handle_message(&self, message: IpcMessage) -> Option<IpcResponse> {
        match message {
            IpcMessage::Audit { event } => {
                self.record(event);
                None
            }
            IpcMessage::Ping { request_id } => Some(IpcResponse::Success {
                request_id,
                data: Some(serde_json::json!({
                    "version": env!("STORAGE_REDIRECT_VERSION"),
                    "git_hash": env!("GIT_HASH"),
                    "pid": std::process::id(),
                    "uptime_seconds": self.started.elapsed().as_secs(),
                })),
                message: Some("pong".to_string()),
            }),
            IpcMessage::ClearLog { request_id, pkg } => Some(match self.log.lock().clear(pkg.as_deref()) {
                Ok(removed) => {
                    info!("Cleared {} access log entries ({})", removed, pkg.as_deref().unwrap_or("all packages"));
                    IpcResponse::Success {
                        request_id,
                        data: Some(serde_json::json!({ "removed": removed })),
                        message: None,
                    }
                }
                Err(e) => {
                    self.logger.log_error(&format!("{:#}", e), Some("clear"));
                    IpcResponse::Error {
                        request_id,
                        code: 500,
                        message: "Failed to clear access log".to_string(),
                        details: Some(format!("{:#}", e)),
                    }
                }
            }),
            IpcMessage::GetStats { request_id } => Some(match serde_json::to_value(self.stats()) {
                Ok(data) => IpcResponse::Success {
                    request_id,
                    data: Some(data),
                    message: None,
                },
                Err(e) => IpcResponse::Error {
                    request_id,
                    code: 500,
                    message: "Failed to serialize statistics".to_string(),
                    details: Some(e.to_string()),
                },
            }),
        }
    }
}

/// Read messages from one client until it disconnects
async fn handle_connection(stream: UnixStream, state: Arc<CollectorState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read from client")? {
        let response = match parse_line(&line) {
            None => continue,
            Some(Ok(message)) => {
                // access log I/O stays off the async workers
                let state = state.clone();
                tokio::task::spawn_blocking(move || state.handle_message(message))
                    .await
                    .context("Message handler panicked")?
            }
            Some(Err(e)) => {
                state.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Rejected IPC line: {}", e);
                Some(IpcResponse::Error {
                    request_id: String::new(),
                    code: 400,
                    message: "Invalid message format".to_string(),
                    details: Some(e.to_string()),
                })
            }
        };

        if let Some(response) = response {
            let mut json = serde_json::to_string(&response).context("Failed to serialize response")?;
            json.push('\n');
            writer
                .write_all(json.as_bytes())
                .await
                .context("Failed to write response")?;
        }
    }

    Ok(())
}

/// Accept connections until `shutdown` resolves
pub async fn serve<F>(config: &CollectorConfiguration, config_path: Option<PathBuf>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    config.ensure_directories()?;

    let logger = CollectorLogger::new(APP_SUBSYSTEM, COLLECTOR_CATEGORY, LogLevel::Info);
    let log = AccessLog::open(&config.collector.log_dir, config.max_log_bytes())?;
    let server = IpcServer::bind(&config.collector.socket_path)?;

    logger.log_startup(config_path.as_deref(), server.socket_path(), log.path(), std::process::id());
    let state = Arc::new(CollectorState::new(log, logger.clone()));

    let accept_loop = async {
        loop {
            match server.accept().await {
                Ok(stream) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            debug!("IPC connection ended with error: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("{:#}", e);
                    return e;
                }
            }
        }
    };

    tokio::pin!(shutdown);
    tokio::select! {
        _ = &mut shutdown => {
            logger.log_shutdown("Received shutdown signal");
        }
        e = accept_loop => {
            logger.log_error(&format!("{:#}", e), Some("accept"));
            logger.log_shutdown("Listener failed");
            return Err(e);
        }
    }

    Ok(())
}

/// Run the collector until Ctrl-C
pub async fn run_collector(config: CollectorConfiguration, config_path: Option<PathBuf>) -> Result<()> {
    serve(&config, config_path, setup_signal_handlers()).await
}

async fn setup_signal_handlers() {
    let _ = signal::ctrl_c().await;
}
