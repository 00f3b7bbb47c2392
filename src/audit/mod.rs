//! Audit decisions and event emission
//!
//! Redirects and denials are always audited. Other operations are audited when a
//! monitor path covers the original path and lists the operation.

pub mod sink;

use log::debug;
use std::sync::Arc;

pub use sink::{AuditSink, MemorySink, NullSink, SinkError, SocketSink};

use crate::config::{AppConfig, ConfigStore};
use crate::models::{AuditEvent, AuditOutcome, Decision, MatchResult, Operation};
use crate::policy::path_matches;

/// Whether an evaluated operation must produce an audit event
pub fn is_audit_worthy(app: &AppConfig, operation: Operation, original_path: &str, result: &MatchResult) -> bool {
    if matches!(result.decision, Decision::Redirect | Decision::DenyReadOnly) {
        return true;
    }
    if !app.monitor_enabled && app.monitor_paths.is_empty() {
        return false;
    }
    let op = operation.as_str();
    app.monitor_paths
        .iter()
        .any(|mp| mp.watches(op) && path_matches(original_path, &mp.path))
}

/// Build the event describing one completed operation.
///
/// `status` is 0 on success or the errno the real operation failed with.
pub fn build_event(
    identity: &str,
    pid: u32,
    uid: u32,
    operation: Operation,
    original_path: &str,
    result: &MatchResult,
    status: i32,
) -> AuditEvent {
    let outcome = match (result.decision, status) {
        (Decision::DenyReadOnly, _) => AuditOutcome::Denied,
        (_, 0) => AuditOutcome::Ok,
        _ => AuditOutcome::Error,
    };
    AuditEvent {
        ts: chrono::Utc::now().timestamp_millis(),
        pkg: identity.to_string(),
        pid,
        uid,
        op: operation,
        path: original_path.to_string(),
        mapped: (result.decision == Decision::Redirect).then(|| result.mapped_path.clone()),
        decision: result.decision,
        rule: result.rule,
        result: outcome,
        errno: (status != 0).then_some(status),
    }
}

/// Audit logger bound to one application identity
pub struct AuditLogger {
    store: Arc<ConfigStore>,
    identity: String,
    pid: u32,
    uid: u32,
    sink: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("identity", &self.identity)
            .field("pid", &self.pid)
            .field("uid", &self.uid)
            .finish()
    }
}

impl AuditLogger {
    pub fn new(store: Arc<ConfigStore>, identity: impl Into<String>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            identity: identity.into(),
            pid: std::process::id(),
            uid: 0,
            sink,
        }
    }

    /// Attribute events to a specific process
    pub fn with_process(mut self, pid: u32, uid: u32) -> Self {
        self.pid = pid;
        self.uid = uid;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn decide(&self, operation: Operation, original_path: &str, result: &MatchResult) -> bool {
        let app = self.store.get_app_config(&self.identity);
        is_audit_worthy(&app, operation, original_path, result)
    }

    /// Forward an event to the sink. Sink failures are logged and otherwise ignored.
    pub fn record(&self, operation: Operation, original_path: &str, result: &MatchResult, status: i32) {
        let event = build_event(&self.identity, self.pid, self.uid, operation, original_path, result, status);
        if let Err(e) = self.sink.emit(event) {
            debug!("Audit event for {} {} not delivered: {}", operation, original_path, e);
        }
    }

    /// `decide` then `record` when audit-worthy; returns whether an event was emitted
    pub fn log_operation(&self, operation: Operation, original_path: &str, result: &MatchResult, status: i32) -> bool {
        if !self.decide(operation, original_path, result) {
            return false;
        }
        self.record(operation, original_path, result, status);
        true
    }
}
