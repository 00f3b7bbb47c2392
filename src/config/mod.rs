//! Policy configuration store
//!
//! Holds the global settings, the monitor-path list and the identity → policy map as a
//! single immutable snapshot. Readers take owned copies; reload builds a complete new
//! snapshot and swaps it in one step.

pub mod loader;
pub mod types;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use loader::{is_valid_identity, write_version, AppSummary, ConfigError, DirectorySource};
pub use types::{
    AppConfig, AppDocument, GlobalConfig, MonitorPath, PolicySnapshot, ReadOnlyRule, RedirectRule,
};

use crate::constants::{APP_UID_THRESHOLD, UPDATE_CHECK_MIN_INTERVAL};

/// Produces a complete policy snapshot. Loading never fails; sources substitute defaults.
pub trait PolicySource: Send + Sync {
    fn load(&self) -> PolicySnapshot;
}

/// Reports the version token of the policy currently published by an external party
pub trait VersionSource: Send + Sync {
    fn current_version(&self) -> Option<u64>;
}

/// Fixed snapshot, for callers that build policy in memory
impl PolicySource for PolicySnapshot {
    fn load(&self) -> PolicySnapshot {
        self.clone()
    }
}

/// Shared policy state for one process
pub struct ConfigStore {
    source: Box<dyn PolicySource>,
    versions: Option<Box<dyn VersionSource>>,
    snapshot: RwLock<Arc<PolicySnapshot>>,
    initialized: Mutex<bool>,
    last_check: Mutex<Option<Instant>>,
    check_interval: Duration,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("initialized", &*self.initialized.lock())
            .field("version", &self.snapshot.read().version)
            .finish()
    }
}

impl ConfigStore {
    /// Create an empty store; nothing is loaded until `initialize`
    pub fn new(source: impl PolicySource + 'static) -> Self {
        Self {
            source: Box::new(source),
            versions: None,
            snapshot: RwLock::new(Arc::new(PolicySnapshot::default())),
            initialized: Mutex::new(false),
            last_check: Mutex::new(None),
            check_interval: UPDATE_CHECK_MIN_INTERVAL,
        }
    }

    /// Store backed by a configuration directory, which also provides the version token
    pub fn from_directory(root: impl AsRef<std::path::Path>) -> Self {
        let source = DirectorySource::new(root);
        Self::new(source.clone()).with_version_source(source)
    }

    /// Store that is already initialized with `snapshot`
    pub fn from_snapshot(snapshot: PolicySnapshot) -> Self {
        let store = Self::new(snapshot);
        store.initialize();
        store
    }

    pub fn with_version_source(mut self, versions: impl VersionSource + 'static) -> Self {
        self.versions = Some(Box::new(versions));
        self
    }

    /// Override the minimum spacing between version checks
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Load everything once. Later calls are no-ops; use `reload` to refresh.
    pub fn initialize(&self) {
        let mut initialized = self.initialized.lock();
        if *initialized {
            return;
        }
        debug!("Initializing config...");
        let snapshot = self.source.load();
        info!("Config initialized, loaded {} apps", snapshot.apps.len());
        *self.snapshot.write() = Arc::new(snapshot);
        *initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// Rebuild the whole snapshot from the source and publish it atomically
    pub fn reload(&self) {
        let snapshot = Arc::new(self.source.load());
        info!(
            "Config reloaded: {} apps, version {:?}",
            snapshot.apps.len(),
            snapshot.version
        );
        *self.snapshot.write() = snapshot;
        *self.initialized.lock() = true;
    }

    /// Current snapshot. Holding the `Arc` keeps it alive across a concurrent reload.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.read().clone()
    }

    /// Independent copy of the policy for `identity`
    pub fn get_app_config(&self, identity: &str) -> AppConfig {
        self.snapshot().resolve(identity)
    }

    pub fn global(&self) -> GlobalConfig {
        self.snapshot().global.clone()
    }

    pub fn monitor_paths(&self) -> Vec<MonitorPath> {
        self.snapshot().monitor_paths.clone()
    }

    pub fn version(&self) -> Option<u64> {
        self.snapshot().version
    }

    /// Identities with a policy document, sorted
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().apps.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a process should be intercepted at all
    pub fn should_hook(&self, identity: &str, uid: u32) -> bool {
        if uid < APP_UID_THRESHOLD {
            return false;
        }
        let app = self.get_app_config(identity);
        app.enabled || app.has_rules()
    }

    /// Compare the published version token with the loaded one and reload on change.
    ///
    /// Rate limited; calls within the check interval return immediately. Returns true
    /// when a reload happened.
    pub fn check_for_update(&self) -> bool {
        {
            let mut last = self.last_check.lock();
            let now = Instant::now();
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.check_interval {
                    return false;
                }
            }
            *last = Some(now);
        }

        let Some(versions) = &self.versions else {
            return false;
        };
        let published = versions.current_version();
        let loaded = self.version();
        if published.is_none() || published == loaded {
            return false;
        }

        info!("Policy version changed {:?} -> {:?}, reloading", loaded, published);
        self.reload();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn app(enabled: bool, redirects: usize, readonly: usize) -> AppConfig {
        AppConfig {
            enabled,
            redirect_rules: (0..redirects)
                .map(|i| RedirectRule {
                    src: format!("/sdcard/src{}", i),
                    dst: format!("/sdcard/dst{}", i),
                })
                .collect(),
            read_only_rules: (0..readonly)
                .map(|i| ReadOnlyRule { path: format!("/sdcard/ro{}", i) })
                .collect(),
            ..AppConfig::default()
        }
    }

    fn snapshot_with(apps: Vec<(&str, AppConfig)>) -> PolicySnapshot {
        let apps: HashMap<String, AppConfig> =
            apps.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        PolicySnapshot::new(GlobalConfig::default(), Vec::new(), apps)
    }

    /// Version source whose token the test controls
    struct Counter(Arc<AtomicU64>);

    impl VersionSource for Counter {
        fn current_version(&self) -> Option<u64> {
            Some(self.0.load(Ordering::SeqCst))
        }
    }

    /// Policy source that reports how often it was loaded
    struct CountingSource(Arc<AtomicU64>);

    impl PolicySource for CountingSource {
        fn load(&self) -> PolicySnapshot {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            PolicySnapshot::default().with_version(Some(n))
        }
    }

    #[test]
    fn test_should_hook_uid_threshold() {
        let store = ConfigStore::from_snapshot(snapshot_with(vec![("com.a", app(true, 0, 0))]));
        assert!(!store.should_hook("com.a", 1000));
        assert!(!store.should_hook("com.a", 9999));
        assert!(store.should_hook("com.a", 10000));
    }

    #[test]
    fn test_should_hook_rules_without_enabled() {
        let store = ConfigStore::from_snapshot(snapshot_with(vec![
            ("com.redirect", app(false, 1, 0)),
            ("com.readonly", app(false, 0, 1)),
            ("com.idle", app(false, 0, 0)),
        ]));
        assert!(store.should_hook("com.redirect", 10001));
        assert!(store.should_hook("com.readonly", 10001));
        assert!(!store.should_hook("com.idle", 10001));
        assert!(!store.should_hook("com.unknown", 10001));
    }

    #[test]
    fn test_get_app_config_is_independent_copy() {
        let store = ConfigStore::from_snapshot(snapshot_with(vec![("com.a", app(true, 1, 0))]));
        let mut copy = store.get_app_config("com.a");
        copy.redirect_rules.clear();
        copy.enabled = false;

        let fresh = store.get_app_config("com.a");
        assert!(fresh.enabled);
        assert_eq!(fresh.redirect_rules.len(), 1);
    }

    #[test]
    fn test_initialize_runs_once() {
        let loads = Arc::new(AtomicU64::new(0));
        let store = ConfigStore::new(CountingSource(loads.clone()));
        assert!(!store.is_initialized());

        store.initialize();
        store.initialize();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.version(), Some(1));

        store.reload();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(store.version(), Some(2));
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let loads = Arc::new(AtomicU64::new(0));
        let store = ConfigStore::new(CountingSource(loads));
        store.initialize();

        let held = store.snapshot();
        store.reload();
        assert_eq!(held.version, Some(1));
        assert_eq!(store.version(), Some(2));
    }

    #[test]
    fn test_check_for_update_reloads_on_version_change() {
        let loads = Arc::new(AtomicU64::new(0));
        let published = Arc::new(AtomicU64::new(1));
        let store = ConfigStore::new(CountingSource(loads.clone()))
            .with_version_source(Counter(published.clone()))
            .with_check_interval(Duration::ZERO);
        store.initialize();

        // loaded version 1 matches published 1
        assert!(!store.check_for_update());
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        published.store(5, Ordering::SeqCst);
        assert!(store.check_for_update());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_check_for_update_is_rate_limited() {
        let loads = Arc::new(AtomicU64::new(0));
        let published = Arc::new(AtomicU64::new(99));
        let store = ConfigStore::new(CountingSource(loads.clone()))
            .with_version_source(Counter(published))
            .with_check_interval(Duration::from_secs(3600));
        store.initialize();

        assert!(store.check_for_update());
        // second call inside the interval does nothing even though versions still differ
        assert!(!store.check_for_update());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_check_for_update_without_source_is_noop() {
        let store = ConfigStore::from_snapshot(PolicySnapshot::default())
            .with_check_interval(Duration::ZERO);
        assert!(!store.check_for_update());
    }
}
