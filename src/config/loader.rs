//! Policy loading from a configuration directory
//!
//! Layout:
//! - `global.json`: GlobalConfig
//! - `monitor_paths.json`: `{"paths": [...]}`
//! - `apps/<identity>.json`: one policy document per application
//! - `version`: decimal version token bumped whenever any of the above changes
//!
//! Nothing here is fatal: a missing or malformed document falls back to defaults
//! (global, monitor list) or is skipped on its own (per-application files).

use log::{debug, info, warn};
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use super::types::{AppConfig, AppDocument, GlobalConfig, MonitorDocument, MonitorPath, PolicySnapshot};
use super::{PolicySource, VersionSource};
use crate::constants::{APPS_CONFIG_DIR, GLOBAL_CONFIG_FILE, MONITOR_CONFIG_FILE, VERSION_FILE};

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid application identity '{0}'")]
    InvalidIdentity(String),

    #[error("{field} {message}")]
    Validation { field: String, message: String },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether `identity` is usable as an application key (package name, optionally with a
/// `:process` suffix)
pub fn is_valid_identity(identity: &str) -> bool {
    static IDENTITY: OnceLock<Option<Regex>> = OnceLock::new();
    IDENTITY
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:\-]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(identity))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound { path: path.to_path_buf() }
        } else {
            ConfigError::Read { path: path.to_path_buf(), source }
        }
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Policy source backed by a configuration directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.root.join(APPS_CONFIG_DIR)
    }

    /// Global settings, defaults on any failure
    pub fn load_global(&self) -> GlobalConfig {
        let path = self.root.join(GLOBAL_CONFIG_FILE);
        match read_json::<GlobalConfig>(&path) {
            Ok(mut global) => {
                global.sanitize();
                debug!("Global config loaded from {}", path.display());
                global
            }
            Err(ConfigError::NotFound { .. }) => {
                debug!("Global config not found, using defaults");
                GlobalConfig::default()
            }
            Err(e) => {
                warn!("Failed to load global config, using defaults: {}", e);
                GlobalConfig::default()
            }
        }
    }

    /// Monitor path list, empty on any failure
    pub fn load_monitor_paths(&self) -> Vec<MonitorPath> {
        let path = self.root.join(MONITOR_CONFIG_FILE);
        match read_json::<MonitorDocument>(&path) {
            Ok(doc) => {
                debug!("Monitor config loaded, {} paths", doc.paths.len());
                doc.paths
            }
            Err(ConfigError::NotFound { .. }) => {
                debug!("Monitor config not found, using empty list");
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to load monitor config, using empty list: {}", e);
                Vec::new()
            }
        }
    }

    /// Parse a single application document
    pub fn load_app(&self, path: &Path) -> Result<(String, AppConfig), ConfigError> {
        let identity = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_valid_identity(&identity) {
            return Err(ConfigError::InvalidIdentity(identity));
        }
        let doc: AppDocument = read_json(path)?;
        Ok((identity, doc.into_policy()))
    }

    /// Every `apps/*.json`, each parsed independently
    pub fn load_apps(&self) -> HashMap<String, AppConfig> {
        // the directory part is literal; only the file name is a pattern
        let pattern = format!("{}/*.json", glob::Pattern::escape(&self.apps_dir().to_string_lossy()));
        let files: Vec<PathBuf> = match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(|entry| entry.ok()).filter(|p| p.is_file()).collect(),
            Err(e) => {
                warn!("Invalid apps config pattern {}: {}", pattern, e);
                return HashMap::new();
            }
        };

        if files.is_empty() {
            debug!("No application configs under {}", self.apps_dir().display());
        }

        files
            .par_iter()
            .filter_map(|path| match self.load_app(path) {
                Ok((identity, app)) => {
                    debug!(
                        "Loaded config for {}: enabled={}, redirects={}, readonly={}",
                        identity,
                        app.enabled,
                        app.redirect_rules.len(),
                        app.read_only_rules.len()
                    );
                    Some((identity, app))
                }
                Err(e) => {
                    warn!("Skipping application config {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }
}

/// One line of `app list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSummary {
    pub identity: String,
    pub enabled: bool,
    pub redirect_rules: usize,
    pub read_only_rules: usize,
}

impl DirectorySource {
    fn app_path(&self, identity: &str) -> Result<PathBuf, ConfigError> {
        if !is_valid_identity(identity) {
            return Err(ConfigError::InvalidIdentity(identity.to_string()));
        }
        Ok(self.apps_dir().join(format!("{}.json", identity)))
    }

    /// Stored document of `identity`, as written (empty rules included)
    pub fn read_app_document(&self, identity: &str) -> Result<AppDocument, ConfigError> {
        read_json(&self.app_path(identity)?)
    }

    /// Validate and store `doc` for `identity`, replacing any previous document through a
    /// temporary file. Returns the document as stored.
    pub fn save_app(&self, identity: &str, mut doc: AppDocument) -> Result<AppDocument, ConfigError> {
        let path = self.app_path(identity)?;
        doc.validate()?;

        let apps_dir = self.apps_dir();
        fs::create_dir_all(&apps_dir).map_err(|source| ConfigError::Write { path: apps_dir, source })?;
        let contents = serde_json::to_string_pretty(&doc).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(|source| ConfigError::Write { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| ConfigError::Write { path: path.clone(), source })?;

        info!("Saved policy for {}", identity);
        Ok(doc)
    }

    /// Remove the document of `identity`; false when there was none
    pub fn delete_app(&self, identity: &str) -> Result<bool, ConfigError> {
        let path = self.app_path(identity)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted policy for {}", identity);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ConfigError::Write { path, source }),
        }
    }

    /// Applications with a policy that does anything, sorted by identity
    pub fn list_apps(&self) -> Vec<AppSummary> {
        let mut apps: Vec<AppSummary> = self
            .load_apps()
            .into_iter()
            .filter(|(_, app)| app.enabled || app.has_rules())
            .map(|(identity, app)| AppSummary {
                identity,
                enabled: app.enabled,
                redirect_rules: app.redirect_rules.len(),
                read_only_rules: app.read_only_rules.len(),
            })
            .collect();
        apps.sort_by(|a, b| a.identity.cmp(&b.identity));
        apps
    }

    /// Publish the next version token so hooked processes reload; returns it
    pub fn bump_version(&self) -> anyhow::Result<u64> {
        let next = self.current_version().unwrap_or(0) + 1;
        write_version(&self.root, next)?;
        Ok(next)
    }
}

impl PolicySource for DirectorySource {
    fn load(&self) -> PolicySnapshot {
        let global = self.load_global();
        let monitor_paths = self.load_monitor_paths();
        let apps = self.load_apps();
        let version = self.current_version();

        info!(
            "Policy loaded from {}: {} apps, {} monitor paths, version {:?}",
            self.root.display(),
            apps.len(),
            monitor_paths.len(),
            version
        );

        PolicySnapshot::new(global, monitor_paths, apps).with_version(version)
    }
}

impl VersionSource for DirectorySource {
    fn current_version(&self) -> Option<u64> {
        let path = self.root.join(VERSION_FILE);
        fs::read_to_string(&path).ok()?.trim().parse().ok()
    }
}

/// Store a new version token, replacing the file in one rename
pub fn write_version(root: &Path, version: u64) -> anyhow::Result<()> {
    use anyhow::Context;

    fs::create_dir_all(root)
        .with_context(|| format!("Failed to create config directory: {}", root.display()))?;
    let path = root.join(VERSION_FILE);
    let tmp = root.join(format!("{}.tmp", VERSION_FILE));
    fs::write(&tmp, format!("{}\n", version))
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
