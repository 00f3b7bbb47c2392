//! Output formatting module
//!
//! Human-readable and JSON renderings for the `check`, `show` and `logs` commands.
//! Human output is returned as strings so the binary decides where it goes.

use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::config::AppConfig;
use crate::models::{AuditEvent, MatchResult, Operation};

/// Result of evaluating one hypothetical operation
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub identity: String,
    pub uid: u32,
    pub operation: Operation,
    pub flags: i32,
    pub path: String,
    pub should_hook: bool,
    pub result: MatchResult,
    pub audited: bool,
}

/// Resolved policy of one identity
#[derive(Debug, Clone, Serialize)]
pub struct ShowReport {
    pub identity: String,
    pub uid: u32,
    pub should_hook: bool,
    pub config_version: Option<u64>,
    pub policy: AppConfig,
}

fn rule_label(result: &MatchResult) -> String {
    match result.rule {
        Some(rule) => format!("{}[{}]", rule.kind.as_str(), rule.index),
        None => "-".to_string(),
    }
}

pub fn format_check_human(report: &CheckReport) -> String {
    let mut out = format!(
        "{} {} {}\n  Decision: {}\n  Path: {}\n  Rule: {}\n  Audited: {}",
        report.identity,
        report.operation,
        report.path,
        report.result.decision,
        report.result.effective_path(&report.path),
        rule_label(&report.result),
        if report.audited { "yes" } else { "no" },
    );
    if !report.should_hook {
        out.push_str("\n  Note: process would not be hooked (uid or policy)");
    }
    out
}

pub fn format_show_human(report: &ShowReport) -> String {
    let policy = &report.policy;
    let mut lines = vec![
        format!("{} (uid {})", report.identity, report.uid),
        format!("  Enabled: {}", policy.enabled),
        format!("  Hooked: {}", report.should_hook),
        format!(
            "  Config version: {}",
            report.config_version.map_or_else(|| "none".to_string(), |v| v.to_string())
        ),
    ];

    lines.push(format!("  Redirect rules ({}):", policy.redirect_rules.len()));
    for (i, rule) in policy.redirect_rules.iter().enumerate() {
        lines.push(format!("    [{}] {} -> {}", i, rule.src, rule.dst));
    }
    lines.push(format!("  Read-only rules ({}):", policy.read_only_rules.len()));
    for (i, rule) in policy.read_only_rules.iter().enumerate() {
        lines.push(format!("    [{}] {}", i, rule.path));
    }
    lines.push(format!(
        "  Monitoring: {} ({} paths)",
        if policy.monitor_enabled { "on" } else { "off" },
        policy.monitor_paths.len()
    ));
    for path in &policy.monitor_paths {
        lines.push(format!("    {} [{}]", path.path, path.operations.join(", ")));
    }
    lines.join("\n")
}

fn format_timestamp(ts: i64) -> String {
    match Utc.timestamp_millis_opt(ts).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => ts.to_string(),
    }
}

/// One line per event, same layout for live and stored events
pub fn format_event_human(event: &AuditEvent) -> String {
    let mut line = format!(
        "[{}] {} ({}) {} {} {} {}",
        format_timestamp(event.ts),
        event.pkg,
        event.pid,
        event.op,
        event.decision,
        event.path,
        event.result.as_str(),
    );
    if let Some(ref mapped) = event.mapped {
        line.push_str(&format!(" -> {}", mapped));
    }
    if let Some(errno) = event.errno {
        line.push_str(&format!(" errno={}", errno));
    }
    line
}
