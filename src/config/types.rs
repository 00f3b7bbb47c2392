//! Policy configuration model
//!
//! Every field carries a default so partial documents deserialize field by field.
//! JSON field names follow the on-device configuration files (camelCase).

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::loader::ConfigError;
use crate::constants::{MAX_LOG_SIZE_MB_MAX, MAX_LOG_SIZE_MB_MIN};

/// Process-wide settings shared by every application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    pub monitor_enabled: bool,
    pub log_level: String,
    #[serde(rename = "maxLogSizeMB")]
    pub max_log_size_mb: u32,
    pub update: UpdateConfig,
    #[serde(rename = "processAttribution")]
    pub process_attr: ProcessAttrConfig,
    pub uri: UriConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            monitor_enabled: true,
            log_level: "info".to_string(),
            max_log_size_mb: 64,
            update: UpdateConfig::default(),
            process_attr: ProcessAttrConfig::default(),
            uri: UriConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Clamp values that parse but fall outside their accepted range
    pub fn sanitize(&mut self) {
        let clamped = self.max_log_size_mb.clamp(MAX_LOG_SIZE_MB_MIN, MAX_LOG_SIZE_MB_MAX);
        if clamped != self.max_log_size_mb {
            warn!(
                "maxLogSizeMB={} outside {}..={}, using {}",
                self.max_log_size_mb, MAX_LOG_SIZE_MB_MIN, MAX_LOG_SIZE_MB_MAX, clamped
            );
            self.max_log_size_mb = clamped;
        }
        if self.update.op_check_interval == 0 {
            warn!("update.opCheckInterval=0 would never check for updates, using 1");
            self.update.op_check_interval = 1;
        }
    }

    /// `logLevel` as a filter for the log backend, defaulting to info
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Dynamic update settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateConfig {
    pub poll_interval_ms: u64,
    /// Number of intercepted operations between two version checks
    pub op_check_interval: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            op_check_interval: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributionMode {
    #[default]
    Strict,
    Balanced,
    Relaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnknownProcessPolicy {
    Allow,
    MonitorOnly,
    #[default]
    DenyWriteOnMatchedPaths,
}

/// How processes are attributed to an application identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessAttrConfig {
    pub mode: AttributionMode,
    pub inherit_to_all_same_uid: bool,
    pub inherit_to_isolated: bool,
    pub inherit_to_child_process: bool,
    pub fallback_unknown_policy: UnknownProcessPolicy,
    pub diagnostic_tag_unknown: bool,
}

impl Default for ProcessAttrConfig {
    fn default() -> Self {
        Self {
            mode: AttributionMode::Strict,
            inherit_to_all_same_uid: true,
            inherit_to_isolated: true,
            inherit_to_child_process: true,
            fallback_unknown_policy: UnknownProcessPolicy::DenyWriteOnMatchedPaths,
            diagnostic_tag_unknown: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UriMappingMode {
    #[default]
    BestEffort,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UriMappingFailure {
    #[default]
    EnforceReadonlyAndMonitor,
    MonitorOnly,
    Allow,
}

/// Content-URI redirect behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UriConfig {
    pub redirect_enabled: bool,
    pub mapping_mode: UriMappingMode,
    pub on_mapping_failed: UriMappingFailure,
    pub log_mapping_details: bool,
}

impl Default for UriConfig {
    fn default() -> Self {
        Self {
            redirect_enabled: true,
            mapping_mode: UriMappingMode::BestEffort,
            on_mapping_failed: UriMappingFailure::EnforceReadonlyAndMonitor,
            log_mapping_details: true,
        }
    }
}

/// Path prefix whose listed operations are always audited
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorPath {
    pub id: i64,
    pub path: String,
    pub desc: String,
    pub operations: Vec<String>,
}

impl MonitorPath {
    pub fn watches(&self, operation: &str) -> bool {
        self.operations.iter().any(|op| op == operation)
    }
}

/// Top-level shape of `monitor_paths.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorDocument {
    pub paths: Vec<MonitorPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectRule {
    pub src: String,
    pub dst: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOnlyRule {
    pub path: String,
}

/// Per-application policy document as stored in `apps/<identity>.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppDocument {
    pub enabled: bool,
    pub redirect_rules: Vec<RedirectRule>,
    pub read_only_rules: Vec<ReadOnlyRule>,
}

/// Collapse repeated separators and drop a trailing one, except for the root itself
fn clean_rule_path(path: &str) -> String {
    let mut cleaned = String::with_capacity(path.len());
    for c in path.chars() {
        if !(c == '/' && cleaned.ends_with('/')) {
            cleaned.push(c);
        }
    }
    if cleaned.len() > 1 && cleaned.ends_with('/') {
        cleaned.pop();
    }
    cleaned
}

fn require_absolute(path: &str, field: String) -> Result<String, ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::Validation {
            field,
            message: "must be an absolute path".to_string(),
        });
    }
    Ok(clean_rule_path(path))
}

impl AppDocument {
    /// Reject relative rule paths and clean the rest in place. Used before a document is
    /// written; loading stays lenient.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        for (i, rule) in self.redirect_rules.iter_mut().enumerate() {
            rule.src = require_absolute(&rule.src, format!("redirectRules[{}].src", i))?;
            rule.dst = require_absolute(&rule.dst, format!("redirectRules[{}].dst", i))?;
        }
        for (i, rule) in self.read_only_rules.iter_mut().enumerate() {
            rule.path = require_absolute(&rule.path, format!("readOnlyRules[{}].path", i))?;
        }
        Ok(())
    }

    /// Drop rules with an empty source, destination or path, keeping declared order
    pub fn into_policy(self) -> AppConfig {
        AppConfig {
            enabled: self.enabled,
            redirect_rules: self
                .redirect_rules
                .into_iter()
                .filter(|r| !r.src.is_empty() && !r.dst.is_empty())
                .collect(),
            read_only_rules: self
                .read_only_rules
                .into_iter()
                .filter(|r| !r.path.is_empty())
                .collect(),
            monitor_paths: Vec::new(),
            monitor_enabled: true,
        }
    }
}

/// Resolved policy for one application identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub enabled: bool,
    pub redirect_rules: Vec<RedirectRule>,
    pub read_only_rules: Vec<ReadOnlyRule>,
    /// Copied from the global monitor list when the policy is resolved
    pub monitor_paths: Vec<MonitorPath>,
    /// Copied from `GlobalConfig::monitor_enabled` when the policy is resolved
    pub monitor_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redirect_rules: Vec::new(),
            read_only_rules: Vec::new(),
            monitor_paths: Vec::new(),
            monitor_enabled: true,
        }
    }
}

impl AppConfig {
    pub fn has_rules(&self) -> bool {
        !self.redirect_rules.is_empty() || !self.read_only_rules.is_empty()
    }

    /// Copy global monitoring state into this policy
    pub fn stamp(&mut self, monitor_paths: &[MonitorPath], monitor_enabled: bool) {
        self.monitor_paths = monitor_paths.to_vec();
        self.monitor_enabled = monitor_enabled;
    }
}

/// Everything the store serves, swapped as one unit on reload
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub global: GlobalConfig,
    pub monitor_paths: Vec<MonitorPath>,
    pub apps: HashMap<String, AppConfig>,
    /// Version token the snapshot was built from, if the source has one
    pub version: Option<u64>,
}

impl PolicySnapshot {
    /// Build a snapshot from parts, stamping every app with the global monitoring state
    pub fn new(
        global: GlobalConfig,
        monitor_paths: Vec<MonitorPath>,
        apps: HashMap<String, AppConfig>,
    ) -> Self {
        let mut snapshot = Self {
            global,
            monitor_paths,
            apps,
            version: None,
        };
        snapshot.stamp_apps();
        snapshot
    }

    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    fn stamp_apps(&mut self) {
        let monitor_enabled = self.global.monitor_enabled;
        for app in self.apps.values_mut() {
            app.stamp(&self.monitor_paths, monitor_enabled);
        }
    }

    /// Owned policy for `identity`, or the disabled default carrying monitor state
    pub fn resolve(&self, identity: &str) -> AppConfig {
        match self.apps.get(identity) {
            Some(app) => app.clone(),
            None => {
                let mut app = AppConfig::default();
                app.stamp(&self.monitor_paths, self.global.monitor_enabled);
                app
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cleans_rule_paths() {
        let mut doc: AppDocument = serde_json::from_str(
            r#"{"enabled": true,
                "redirectRules": [{"src": "/sdcard//App/", "dst": "/data/x/"}],
                "readOnlyRules": [{"path": "/"}]}"#,
        )
        .unwrap();
        doc.validate().unwrap();
        assert_eq!(doc.redirect_rules[0].src, "/sdcard/App");
        assert_eq!(doc.redirect_rules[0].dst, "/data/x");
        assert_eq!(doc.read_only_rules[0].path, "/");
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let mut doc = AppDocument {
            enabled: true,
            redirect_rules: vec![RedirectRule { src: "/sdcard/App".into(), dst: "relative".into() }],
            read_only_rules: Vec::new(),
        };
        match doc.validate() {
            Err(ConfigError::Validation { field, .. }) => assert_eq!(field, "redirectRules[0].dst"),
            other => panic!("unexpected {:?}", other),
        }

        let mut doc = AppDocument {
            read_only_rules: vec![ReadOnlyRule { path: "sdcard".into() }],
            ..AppDocument::default()
        };
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_empty_global_document_uses_defaults() {
        let config: GlobalConfig = serde_json::from_str("{}").unwrap();
        assert!(config.monitor_enabled);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_log_size_mb, 64);
        assert_eq!(config.update.poll_interval_ms, 3000);
        assert_eq!(config.update.op_check_interval, 50);
        assert_eq!(config.process_attr.mode, AttributionMode::Strict);
        assert!(config.process_attr.inherit_to_all_same_uid);
        assert!(config.process_attr.inherit_to_isolated);
        assert!(config.process_attr.inherit_to_child_process);
        assert_eq!(
            config.process_attr.fallback_unknown_policy,
            UnknownProcessPolicy::DenyWriteOnMatchedPaths
        );
        assert!(config.process_attr.diagnostic_tag_unknown);
        assert_eq!(config.uri, UriConfig::default());
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn test_partial_nested_document_fills_missing_fields() {
        let json = r#"{
            "monitorEnabled": false,
            "update": { "pollIntervalMs": 1000 },
            "processAttribution": { "mode": "relaxed", "inheritToIsolated": false },
            "uri": { "mappingMode": "strict" }
        }"#;
        let config: GlobalConfig = serde_json::from_str(json).unwrap();

        assert!(!config.monitor_enabled);
        assert_eq!(config.max_log_size_mb, 64);
        assert_eq!(config.update.poll_interval_ms, 1000);
        assert_eq!(config.update.op_check_interval, 50);
        assert_eq!(config.process_attr.mode, AttributionMode::Relaxed);
        assert!(!config.process_attr.inherit_to_isolated);
        assert!(config.process_attr.inherit_to_child_process);
        assert_eq!(config.uri.mapping_mode, UriMappingMode::Strict);
        assert!(config.uri.redirect_enabled);
    }

    #[test]
    fn test_unknown_mode_is_a_parse_error() {
        let json = r#"{ "processAttribution": { "mode": "lenient" } }"#;
        assert!(serde_json::from_str::<GlobalConfig>(json).is_err());
    }

    #[test]
    fn test_sanitize_clamps_log_size() {
        let mut config = GlobalConfig {
            max_log_size_mb: 2,
            ..GlobalConfig::default()
        };
        config.sanitize();
        assert_eq!(config.max_log_size_mb, 8);

        config.max_log_size_mb = 4096;
        config.sanitize();
        assert_eq!(config.max_log_size_mb, 1024);
    }

    #[test]
    fn test_level_filter_falls_back_to_info() {
        let mut config = GlobalConfig::default();
        assert_eq!(config.level_filter(), log::LevelFilter::Info);
        config.log_level = "debug".to_string();
        assert_eq!(config.level_filter(), log::LevelFilter::Debug);
        config.log_level = "chatty".to_string();
        assert_eq!(config.level_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn test_app_document_drops_empty_entries() {
        let json = r#"{
            "enabled": true,
            "redirectRules": [
                { "src": "/sdcard/App", "dst": "/sdcard/Android/data/pkg/files" },
                { "src": "", "dst": "/x" },
                { "src": "/y" },
                { "src": "/sdcard/B", "dst": "/sdcard/C" }
            ],
            "readOnlyRules": [ { "path": "" }, { "path": "/sdcard/ro" }, {} ]
        }"#;
        let doc: AppDocument = serde_json::from_str(json).unwrap();
        let app = doc.into_policy();

        assert!(app.enabled);
        assert_eq!(app.redirect_rules.len(), 2);
        assert_eq!(app.redirect_rules[0].src, "/sdcard/App");
        assert_eq!(app.redirect_rules[1].src, "/sdcard/B");
        assert_eq!(app.read_only_rules, vec![ReadOnlyRule { path: "/sdcard/ro".to_string() }]);
    }

    #[test]
    fn test_snapshot_resolve_unknown_identity() {
        let monitor = vec![MonitorPath {
            id: 1,
            path: "/sdcard/DCIM".to_string(),
            desc: "camera".to_string(),
            operations: vec!["unlink".to_string()],
        }];
        let global = GlobalConfig {
            monitor_enabled: false,
            ..GlobalConfig::default()
        };
        let snapshot = PolicySnapshot::new(global, monitor.clone(), HashMap::new());

        let app = snapshot.resolve("com.unknown");
        assert!(!app.enabled);
        assert!(!app.has_rules());
        assert_eq!(app.monitor_paths, monitor);
        assert!(!app.monitor_enabled);
    }

    #[test]
    fn test_snapshot_stamps_known_apps() {
        let mut apps = HashMap::new();
        apps.insert(
            "com.example".to_string(),
            AppDocument {
                enabled: true,
                ..AppDocument::default()
            }
            .into_policy(),
        );
        let monitor = vec![MonitorPath {
            path: "/sdcard".to_string(),
            ..MonitorPath::default()
        }];
        let snapshot = PolicySnapshot::new(GlobalConfig::default(), monitor.clone(), apps);

        let app = snapshot.resolve("com.example");
        assert!(app.enabled);
        assert_eq!(app.monitor_paths, monitor);
        assert!(app.monitor_enabled);
    }
}
