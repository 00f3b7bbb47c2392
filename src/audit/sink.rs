//! Audit event transports
//!
//! Delivery is best effort. `emit` never blocks: events go into a bounded queue and are
//! dropped when it is full or the collector cannot be reached.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::daemon::config::CollectorConfiguration;
use crate::daemon::ipc::IpcMessage;
use crate::models::AuditEvent;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("audit queue full, event dropped")]
    QueueFull,

    #[error("audit transport closed")]
    Closed,

    #[error("failed to start audit transport: {0}")]
    Startup(#[from] std::io::Error),
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent) -> Result<(), SinkError>;
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn emit(&self, _event: AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps events in memory, in emission order
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, event: AuditEvent) -> Result<(), SinkError> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn emit(&self, event: AuditEvent) -> Result<(), SinkError> {
        (**self).emit(event)
    }
}

/// Ships events to the collector's Unix socket from a background thread
#[derive(Debug)]
pub struct SocketSink {
    sender: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
    socket_path: PathBuf,
}

impl SocketSink {
    /// Start the delivery thread. Fails only if the thread or its runtime cannot start;
    /// an absent collector is not an error.
    pub fn spawn(socket_path: impl AsRef<Path>, capacity: usize) -> Result<Self, SinkError> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;

        let path = socket_path.clone();
        let counter = dropped.clone();
        std::thread::Builder::new()
            .name("audit-sink".to_string())
            .spawn(move || runtime.block_on(deliver(path, receiver, counter)))?;

        Ok(Self {
            sender,
            dropped,
            socket_path,
        })
    }

    /// Sink for the collector described by `config`, queue sized by `queue_capacity`
    pub fn from_config(config: &CollectorConfiguration) -> Result<Self, SinkError> {
        Self::spawn(&config.collector.socket_path, config.collector.queue_capacity)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Events dropped so far, at enqueue or delivery
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditSink for SocketSink {
    fn emit(&self, event: AuditEvent) -> Result<(), SinkError> {
        self.sender.try_send(event).map_err(|e| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => SinkError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            }
        })
    }
}

async fn connect(path: &Path) -> Option<UnixStream> {
    match tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(path)).await {
        Ok(Ok(stream)) => Some(stream),
        _ => None,
    }
}

/// Drain the queue into the collector, reconnecting lazily after failures
async fn deliver(path: PathBuf, mut receiver: mpsc::Receiver<AuditEvent>, dropped: Arc<AtomicU64>) {
    let mut stream: Option<UnixStream> = None;

    while let Some(event) = receiver.recv().await {
        let mut line = match serde_json::to_string(&IpcMessage::Audit { event }) {
            Ok(line) => line,
            Err(_) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        line.push('\n');

        if stream.is_none() {
            stream = connect(&path).await;
        }
        let delivered = match stream.as_mut() {
            Some(s) => s.write_all(line.as_bytes()).await.is_ok(),
            None => false,
        };
        if !delivered {
            stream = None;
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditOutcome, Decision, Operation};

    fn event(path: &str) -> AuditEvent {
        AuditEvent {
            ts: 0,
            pkg: "com.example".to_string(),
            pid: 1,
            uid: 10001,
            op: Operation::Unlink,
            path: path.to_string(),
            mapped: None,
            decision: Decision::DenyReadOnly,
            rule: None,
            result: AuditOutcome::Denied,
            errno: Some(libc::EACCES),
        }
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.emit(event("/a")).unwrap();
        sink.emit(event("/b")).unwrap();
        let paths: Vec<String> = sink.take().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_socket_sink_without_collector_does_not_fail_emit() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SocketSink::spawn(dir.path().join("missing.sock"), 8).unwrap();
        // queue accepts the event; delivery failure is only counted
        assert!(sink.emit(event("/a")).is_ok());
    }

    #[test]
    fn test_from_config_sizes_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CollectorConfiguration::default();
        config.collector.socket_path = dir.path().join("audit.sock");
        config.collector.queue_capacity = 3;

        let sink = SocketSink::from_config(&config).unwrap();
        assert_eq!(sink.socket_path(), config.collector.socket_path);
        assert_eq!(sink.sender.max_capacity(), 3);
    }
}
