//! End-to-end enforcement through the reference interceptor on a real filesystem

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nix::unistd::AccessFlags;
use storage_redirect::audit::MemorySink;
use storage_redirect::config::{
    write_version, AppConfig, ConfigStore, GlobalConfig, MonitorPath, PolicySnapshot, ReadOnlyRule, RedirectRule,
};
use storage_redirect::interceptor::{GuardedFs, Interceptor, ProcessIdentity};
use storage_redirect::models::{AuditOutcome, Decision, Operation};
use tempfile::{tempdir, TempDir};

const APP: &str = "com.example.app";
const APP_UID: u32 = 10_123;

struct Fixture {
    dir: TempDir,
    sink: Arc<MemorySink>,
    fs: GuardedFs,
}

impl Fixture {
    /// `<tmp>/public` redirected to `<tmp>/private`, `<tmp>/public/ro` read-only
    fn new(monitor_paths: Vec<MonitorPath>) -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("public/ro")).unwrap();
        fs::create_dir_all(dir.path().join("private")).unwrap();
        fs::create_dir_all(dir.path().join("plain")).unwrap();

        let app = AppConfig {
            enabled: true,
            read_only_rules: vec![ReadOnlyRule { path: Self::join(dir.path(), "public/ro") }],
            redirect_rules: vec![RedirectRule {
                src: Self::join(dir.path(), "public"),
                dst: Self::join(dir.path(), "private"),
            }],
            ..AppConfig::default()
        };
        let mut apps = HashMap::new();
        apps.insert(APP.to_string(), app);
        let store = Arc::new(ConfigStore::from_snapshot(PolicySnapshot::new(
            GlobalConfig::default(),
            monitor_paths,
            apps,
        )));

        let sink = Arc::new(MemorySink::new());
        let fs = GuardedFs::new(store, ProcessIdentity::new(APP, 4242, APP_UID), sink.clone());
        Self { dir, sink, fs }
    }

    fn join(root: &Path, rel: &str) -> String {
        root.join(rel).to_string_lossy().into_owned()
    }

    fn path(&self, rel: &str) -> String {
        Self::join(self.dir.path(), rel)
    }
}

#[test]
fn test_open_for_write_lands_in_redirect_target() {
    let fx = Fixture::new(Vec::new());
    assert!(fx.fs.is_enabled());

    let mut file = fx
        .fs
        .open(&fx.path("public/note.txt"), libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644)
        .unwrap();
    file.write_all(b"hello").unwrap();
    drop(file);

    assert!(!Path::new(&fx.path("public/note.txt")).exists());
    assert_eq!(fs::read_to_string(fx.path("private/note.txt")).unwrap(), "hello");

    let mut contents = String::new();
    fx.fs
        .open(&fx.path("public/note.txt"), libc::O_RDONLY, 0)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "hello");

    let events = fx.sink.take();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.decision == Decision::Redirect));
    assert_eq!(events[0].path, fx.path("public/note.txt"));
    assert_eq!(events[0].mapped.as_deref(), Some(fx.path("private/note.txt").as_str()));
    assert_eq!(events[0].pid, 4242);
    assert_eq!(events[0].uid, APP_UID);
    assert_eq!(events[0].result, AuditOutcome::Ok);
}

#[test]
fn test_read_only_open_with_create_flag_creates_file() {
    let fx = Fixture::new(Vec::new());
    let created = fx.path("plain/new.txt");
    fx.fs.open(&created, libc::O_RDONLY | libc::O_CREAT, 0o644).unwrap();
    assert!(Path::new(&created).exists());

    // through a redirect the created file lands in the target and is audited as ok
    fx.fs
        .open(&fx.path("public/made.txt"), libc::O_RDONLY | libc::O_CREAT, 0o644)
        .unwrap();
    assert!(Path::new(&fx.path("private/made.txt")).exists());

    let events = fx.sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, AuditOutcome::Ok);
    assert_eq!(events[0].errno, None);
}

#[test]
fn test_readonly_denies_without_touching_filesystem() {
    let fx = Fixture::new(Vec::new());
    let protected = fx.path("public/ro/keep.txt");
    fs::write(&protected, "keep").unwrap();

    let err = fx.fs.unlink(&protected).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
    assert!(Path::new(&protected).exists());

    let err = fx.fs.mkdir(&fx.path("public/ro/newdir"), 0o755).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
    assert!(!Path::new(&fx.path("public/ro/newdir")).exists());

    let err = fx.fs.open(&protected, libc::O_RDWR, 0).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
    assert_eq!(fs::read_to_string(&protected).unwrap(), "keep");

    let events = fx.sink.take();
    assert_eq!(events.len(), 3);
    for event in &events {
        assert_eq!(event.decision, Decision::DenyReadOnly);
        assert_eq!(event.result, AuditOutcome::Denied);
        assert_eq!(event.errno, Some(libc::EACCES));
        assert_eq!(event.mapped, None);
    }
}

#[test]
fn test_read_on_readonly_path_is_redirected_not_denied() {
    let fx = Fixture::new(Vec::new());
    fs::create_dir_all(fx.path("private/ro")).unwrap();
    fs::write(fx.path("private/ro/data"), "x").unwrap();

    let meta = fx.fs.stat(&fx.path("public/ro/data")).unwrap();
    assert_eq!(meta.len(), 1);
    fx.fs.access(&fx.path("public/ro/data"), AccessFlags::R_OK).unwrap();

    let events = fx.sink.take();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].op, Operation::Stat);
    assert_eq!(events[1].op, Operation::Access);
    assert!(events.iter().all(|e| e.decision == Decision::Redirect));
}

#[test]
fn test_failed_operation_reports_errno() {
    let fx = Fixture::new(Vec::new());
    let err = fx.fs.stat(&fx.path("public/missing")).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

    let events = fx.sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, AuditOutcome::Error);
    assert_eq!(events[0].errno, Some(libc::ENOENT));
}

#[test]
fn test_unmatched_paths_pass_and_are_not_audited() {
    let fx = Fixture::new(Vec::new());
    let plain = fx.path("plain/a.txt");
    fx.fs.open(&plain, libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
    fx.fs.rename(&plain, &fx.path("plain/b.txt")).unwrap();
    fx.fs.unlink(&fx.path("plain/b.txt")).unwrap();
    fx.fs.mkdir(&fx.path("plain/d"), 0o755).unwrap();
    fx.fs.rmdir(&fx.path("plain/d")).unwrap();

    assert!(!Path::new(&fx.path("plain/d")).exists());
    assert!(fx.sink.events().is_empty());
}

#[test]
fn test_monitored_operations_are_audited() {
    let dir_holder = tempdir().unwrap();
    let monitor_root = dir_holder.path().to_string_lossy().into_owned();
    let fx = Fixture::new(vec![MonitorPath {
        id: 1,
        path: monitor_root.clone(),
        desc: String::new(),
        operations: vec!["mkdir".to_string()],
    }]);

    let watched = format!("{}/made", monitor_root);
    fx.fs.mkdir(&watched, 0o755).unwrap();
    fx.fs.lstat(&watched).unwrap();

    let events = fx.sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].op, Operation::Mkdir);
    assert_eq!(events[0].decision, Decision::Pass);
    assert_eq!(events[0].result, AuditOutcome::Ok);
}

#[test]
fn test_rename_evaluates_source_only() {
    let fx = Fixture::new(Vec::new());
    let outside = fx.path("plain/x.txt");
    fs::write(&outside, "x").unwrap();

    // destination inside the read-only prefix is not evaluated
    fx.fs.rename(&outside, &fx.path("public/ro/x.txt")).unwrap();
    assert!(Path::new(&fx.path("public/ro/x.txt")).exists());
    assert!(fx.sink.events().is_empty());

    let err = fx.fs.rename(&fx.path("public/ro/x.txt"), &outside).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
}

#[test]
fn test_openat_relative_path_bypasses_policy() {
    let fx = Fixture::new(Vec::new());
    let ro_dir = fx.dir.path().join("public/ro");
    let file = fx.fs.openat(&ro_dir, "direct.txt", libc::O_WRONLY | libc::O_CREAT, 0o644);
    assert!(file.is_ok());
    assert!(ro_dir.join("direct.txt").exists());
    assert!(fx.sink.events().is_empty());

    let err = fx
        .fs
        .openat(&ro_dir, &fx.path("public/ro/abs.txt"), libc::O_WRONLY | libc::O_CREAT, 0o644)
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
}

#[test]
fn test_system_uid_is_not_hooked() {
    let dir = tempdir().unwrap();
    let ro = dir.path().join("ro");
    fs::create_dir_all(&ro).unwrap();
    let victim = ro.join("f");
    fs::write(&victim, "x").unwrap();

    let app = AppConfig {
        enabled: true,
        read_only_rules: vec![ReadOnlyRule { path: ro.to_string_lossy().into_owned() }],
        ..AppConfig::default()
    };
    let mut apps = HashMap::new();
    apps.insert(APP.to_string(), app);
    let store = Arc::new(ConfigStore::from_snapshot(PolicySnapshot::new(GlobalConfig::default(), Vec::new(), apps)));
    let sink = Arc::new(MemorySink::new());
    let guarded = GuardedFs::new(store, ProcessIdentity::new(APP, 1, 1000), sink.clone());

    assert!(!guarded.is_enabled());
    guarded.unlink(&victim.to_string_lossy()).unwrap();
    assert!(!victim.exists());
    assert!(sink.events().is_empty());
}

#[test]
fn test_policy_update_picked_up_after_op_check_interval() {
    let config = tempdir().unwrap();
    let data = tempdir().unwrap();
    let ro = data.path().join("ro");
    fs::create_dir_all(&ro).unwrap();
    let ro_str = ro.to_string_lossy().into_owned();

    fs::create_dir_all(config.path().join("apps")).unwrap();
    fs::write(config.path().join("global.json"), r#"{"update": {"opCheckInterval": 3}}"#).unwrap();
    fs::write(config.path().join("apps").join(format!("{}.json", APP)), r#"{"enabled": true}"#).unwrap();
    write_version(config.path(), 1).unwrap();

    let store = Arc::new(ConfigStore::from_directory(config.path()).with_check_interval(Duration::ZERO));
    store.initialize();
    let guarded = GuardedFs::new(store.clone(), ProcessIdentity::new(APP, 1, APP_UID), Arc::new(MemorySink::new()));

    let target = format!("{}/a", ro_str);
    guarded.mkdir(&target, 0o755).unwrap();
    guarded.rmdir(&target).unwrap();

    let policy = format!(r#"{{"enabled": true, "readOnlyRules": [{{"path": "{}"}}]}}"#, ro_str);
    fs::write(config.path().join("apps").join(format!("{}.json", APP)), policy).unwrap();
    write_version(config.path(), 2).unwrap();

    // third operation triggers the version check before it is evaluated
    let err = guarded.mkdir(&target, 0o755).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EACCES));
    assert_eq!(store.version(), Some(2));
}
