//! Decision engine
//!
//! Turns one intercepted `(path, operation, flags)` into PASS, REDIRECT or DENY_RO for the
//! application the engine is bound to.

use std::sync::Arc;

use super::path_matcher::{map_prefix, normalize, normalized_path_matches};
use crate::config::{AppConfig, ConfigStore};
use crate::models::{Decision, MatchResult, Operation, RuleKind};

/// Evaluate against an already resolved policy.
///
/// Read-only rules are scanned first and only terminate evaluation for write-like
/// operations; redirect rules are scanned next. Within each list the first match wins.
pub fn evaluate_policy(app: &AppConfig, path: &str, operation: Operation, flags: i32) -> MatchResult {
    if path.is_empty() || !path.starts_with('/') {
        return MatchResult::pass(path);
    }
    if !app.enabled {
        return MatchResult::pass(path);
    }

    let normalized = normalize(path);

    for (index, rule) in app.read_only_rules.iter().enumerate() {
        if normalized_path_matches(&normalized, &rule.path) {
            if operation.is_write_like(flags) {
                return MatchResult::with_rule(Decision::DenyReadOnly, normalized, RuleKind::Readonly, index);
            }
            break;
        }
    }

    for (index, rule) in app.redirect_rules.iter().enumerate() {
        if normalized_path_matches(&normalized, &rule.src) {
            if rule.src == rule.dst {
                return MatchResult::with_rule(Decision::Pass, normalized, RuleKind::Redirect, index);
            }
            let mapped = map_prefix(&normalized, &rule.src, &rule.dst);
            return MatchResult::with_rule(Decision::Redirect, mapped, RuleKind::Redirect, index);
        }
    }

    MatchResult::pass(normalized)
}

/// Evaluates operations for one application identity against a shared store
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    store: Arc<ConfigStore>,
    identity: String,
}

impl DecisionEngine {
    pub fn new(store: Arc<ConfigStore>, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Decide how the real operation on `path` must proceed
    pub fn evaluate(&self, path: &str, operation: Operation, flags: i32) -> MatchResult {
        if path.is_empty() || !path.starts_with('/') {
            return MatchResult::pass(path);
        }
        let app = self.store.get_app_config(&self.identity);
        evaluate_policy(&app, path, operation, flags)
    }
}
