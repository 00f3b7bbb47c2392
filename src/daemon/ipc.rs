//! Inter-process communication with the audit collector
//!
//! Newline-delimited JSON over a Unix domain socket. Audit events are fire-and-forget;
//! control requests get exactly one response line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::models::AuditEvent;

/// How long a control client waits for the collector
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// IPC message types understood by the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// One audit event; never answered
    Audit { event: AuditEvent },
    /// Liveness check
    Ping { request_id: String },
    /// Collector runtime statistics
    GetStats { request_id: String },
    /// Drop every access log entry, or only those of `pkg`
    ClearLog {
        request_id: String,
        #[serde(default)]
        pkg: Option<String>,
    },
}

impl IpcMessage {
    /// Whether the collector answers this message
    pub fn expects_reply(&self) -> bool {
        !matches!(self, IpcMessage::Audit { .. })
    }
}

/// IPC response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IpcResponse {
    Success {
        request_id: String,
        data: Option<serde_json::Value>,
        message: Option<String>,
    },
    Error {
        request_id: String,
        code: u32,
        message: String,
        details: Option<String>,
    },
}

/// Collector runtime statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorStats {
    pub pid: u32,
    pub uptime_seconds: u64,
    /// Audit events received since startup
    pub events_received: u64,
    /// Audit events appended to the access log
    pub events_written: u64,
    /// Lines that were not valid messages
    pub parse_errors: u64,
    /// Times the access log was trimmed
    pub trims: u64,
    pub log_path: PathBuf,
    pub log_size_bytes: u64,
    /// Access log cap
    pub max_log_bytes: u64,
    /// Distinct packages in the access log
    pub app_count: usize,
}

/// Generate unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Bound collector socket; the socket file is removed on drop
#[derive(Debug)]
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the socket, replacing a stale socket file and creating its directory
    pub fn bind(socket_path: impl Into<PathBuf>) -> Result<Self> {
        let socket_path = socket_path.into();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove existing socket: {}", socket_path.display()))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind to socket: {}", socket_path.display()))?;

        // Hooked applications run under arbitrary uids and must all reach the socket
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o666))
                .with_context(|| format!("Failed to set socket permissions: {}", socket_path.display()))?;
        }

        Ok(Self { socket_path, listener })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .context("Failed to accept IPC connection")?;
        Ok(stream)
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Parse one wire line; blank lines yield `None`
pub fn parse_line(line: &str) -> Option<Result<IpcMessage, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Send a control request and wait for its response line
pub async fn send_request(socket_path: &Path, message: &IpcMessage) -> Result<IpcResponse> {
    let exchange = async {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to collector at {}", socket_path.display()))?;
        let (reader, mut writer) = stream.into_split();

        let mut request = serde_json::to_string(message).context("Failed to serialize request")?;
        request.push('\n');
        writer
            .write_all(request.as_bytes())
            .await
            .context("Failed to send request")?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let read = reader.read_line(&mut line).await.context("Failed to read response")?;
        if read == 0 {
            anyhow::bail!("Collector closed the connection without responding");
        }

        serde_json::from_str::<IpcResponse>(line.trim()).context("Failed to parse response")
    };

    tokio::time::timeout(REQUEST_TIMEOUT, exchange)
        .await
        .context("Timed out waiting for collector")?
}
