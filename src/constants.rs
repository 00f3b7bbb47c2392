//! Global constants for storage-redirect
//!
//! Centralized location for default paths, thresholds and intervals

use std::time::Duration;

/// Default policy configuration directory
pub const DEFAULT_CONFIG_DIR: &str = "/data/adb/modules/StorageRedirect/config";

/// Default Unix socket the audit collector listens on
pub const DEFAULT_SOCKET_PATH: &str = "/data/adb/modules/StorageRedirect/run/ipc.sock";

/// Default directory for the access log
pub const DEFAULT_LOG_DIR: &str = "/data/adb/modules/StorageRedirect/logs";

/// Environment overrides, same names the on-device service scripts export
pub const ENV_CONFIG_DIR: &str = "SR_CONFIG_DIR";
pub const ENV_SOCKET_PATH: &str = "SR_SOCKET";
pub const ENV_LOG_DIR: &str = "SR_LOGDIR";

/// File names inside the configuration directory
pub const GLOBAL_CONFIG_FILE: &str = "global.json";
pub const MONITOR_CONFIG_FILE: &str = "monitor_paths.json";
pub const APPS_CONFIG_DIR: &str = "apps";
pub const VERSION_FILE: &str = "version";

/// Name of the access log inside the log directory
pub const ACCESS_LOG_FILE: &str = "access.log";

/// Collector configuration file name under the user config dir
pub const COLLECTOR_CONFIG_FILE: &str = "collector.toml";

/// First uid assigned to regular applications; anything below is a system process
pub const APP_UID_THRESHOLD: u32 = 10_000;

/// Minimum spacing between two policy version checks
pub const UPDATE_CHECK_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Bounds accepted for `maxLogSizeMB`
pub const MAX_LOG_SIZE_MB_MIN: u32 = 8;
pub const MAX_LOG_SIZE_MB_MAX: u32 = 1024;

/// Share of access-log entries kept when the log outgrows its cap
pub const ACCESS_LOG_KEEP_RATIO: f64 = 0.8;

/// Lower bound on entries kept after trimming the access log
pub const ACCESS_LOG_KEEP_MIN: usize = 100;

/// Page size of access log queries when none is given, and the largest page served
pub const LOG_QUERY_DEFAULT_LIMIT: usize = 100;
pub const LOG_QUERY_MAX_LIMIT: usize = 1000;

/// Default capacity of the in-process audit queue
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Subsystem identifier used in structured collector log lines
pub const APP_SUBSYSTEM: &str = "storage-redirect";

/// Collector category for structured log lines
pub const COLLECTOR_CATEGORY: &str = "collector";
