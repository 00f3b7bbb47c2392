//! Data models module
//!
//! Defines core data structures shared by the engine, the audit path and the collector:
//! - Operation: an intercepted filesystem primitive
//! - Decision / MatchResult: outcome of evaluating one operation
//! - AuditEvent: one audited operation as shipped to the collector

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Filesystem primitive observed at the interception boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Open,
    Read,
    Write,
    Rename,
    Unlink,
    Mkdir,
    Rmdir,
    Access,
    Stat,
}

impl Operation {
    /// Every operation, in declaration order
    pub const ALL: [Operation; 9] = [
        Operation::Open,
        Operation::Read,
        Operation::Write,
        Operation::Rename,
        Operation::Unlink,
        Operation::Mkdir,
        Operation::Rmdir,
        Operation::Access,
        Operation::Stat,
    ];

    /// Name used in monitor-path operation sets and audit events
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Rename => "rename",
            Operation::Unlink => "unlink",
            Operation::Mkdir => "mkdir",
            Operation::Rmdir => "rmdir",
            Operation::Access => "access",
            Operation::Stat => "stat",
        }
    }

    /// Whether this operation, with the given open flags, mutates the filesystem.
    ///
    /// OPEN only counts as a write when the access mode asks for it; every other
    /// operation ignores `flags`.
    pub fn is_write_like(&self, flags: i32) -> bool {
        match self {
            Operation::Write
            | Operation::Rename
            | Operation::Unlink
            | Operation::Mkdir
            | Operation::Rmdir => true,
            Operation::Open => flags & (libc::O_WRONLY | libc::O_RDWR) != 0,
            Operation::Read | Operation::Access | Operation::Stat => false,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown operation '{}'", s))
    }
}

/// Terminal outcome of evaluating one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "REDIRECT")]
    Redirect,
    #[serde(rename = "DENY_RO")]
    DenyReadOnly,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Pass => "PASS",
            Decision::Redirect => "REDIRECT",
            Decision::DenyReadOnly => "DENY_RO",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule list produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Readonly,
    Redirect,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Readonly => "readonly",
            RuleKind::Redirect => "redirect",
        }
    }
}

/// Reference to the rule that produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRef {
    pub kind: RuleKind,
    pub index: usize,
}

/// Result of evaluating one intercepted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub decision: Decision,
    /// Path the operation should use: the original or normalized path for PASS and
    /// DENY_RO, the rewritten path for REDIRECT
    pub mapped_path: String,
    /// Rule that produced the decision, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleRef>,
}

impl MatchResult {
    /// Pass-through that no rule produced
    pub fn pass(path: impl Into<String>) -> Self {
        Self {
            decision: Decision::Pass,
            mapped_path: path.into(),
            rule: None,
        }
    }

    pub fn with_rule(decision: Decision, path: impl Into<String>, kind: RuleKind, index: usize) -> Self {
        Self {
            decision,
            mapped_path: path.into(),
            rule: Some(RuleRef { kind, index }),
        }
    }

    pub fn rule_index(&self) -> Option<usize> {
        self.rule.map(|r| r.index)
    }

    pub fn rule_kind(&self) -> Option<RuleKind> {
        self.rule.map(|r| r.kind)
    }

    /// Path the real operation must be performed on
    pub fn effective_path<'a>(&'a self, original: &'a str) -> &'a str {
        match self.decision {
            Decision::Redirect => &self.mapped_path,
            Decision::Pass | Decision::DenyReadOnly => original,
        }
    }
}

/// Outcome of the real operation as reported in audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Ok,
    Denied,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Ok => "ok",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Error => "error",
        }
    }
}

/// One audited filesystem operation.
///
/// Field names follow the access-log line format read back by `logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Milliseconds since the Unix epoch; zero means "stamp on receipt"
    #[serde(default)]
    pub ts: i64,
    pub pkg: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub uid: u32,
    pub op: Operation,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped: Option<String>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleRef>,
    pub result: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
}
