//! Interception boundary and a reference filesystem adapter
//!
//! A hooking layer implements [`Interceptor`] once per process. [`GuardedFs`] is a
//! complete implementation on top of `std::fs` that applies policy decisions, which makes
//! the policy testable without any hooking machinery.

use log::debug;
use nix::unistd::AccessFlags;
use std::fs::{File, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audit::{AuditLogger, AuditSink, SinkError, SocketSink};
use crate::config::ConfigStore;
use crate::daemon::config::CollectorConfiguration;
use crate::logging::init_logging;
use crate::models::{Decision, Operation};
use crate::policy::DecisionEngine;

/// One method per intercepted filesystem primitive
pub trait Interceptor {
    fn open(&self, path: &str, flags: i32, mode: u32) -> io::Result<File>;

    /// Open relative to `dir`. Only absolute paths are subject to policy.
    fn openat(&self, dir: &Path, path: &str, flags: i32, mode: u32) -> io::Result<File>;

    fn access(&self, path: &str, mode: AccessFlags) -> io::Result<()>;
    fn stat(&self, path: &str) -> io::Result<Metadata>;
    fn lstat(&self, path: &str) -> io::Result<Metadata>;

    /// Policy applies to `from`; `to` is used as given
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    fn unlink(&self, path: &str) -> io::Result<()>;
    fn mkdir(&self, path: &str, mode: u32) -> io::Result<()>;
    fn rmdir(&self, path: &str) -> io::Result<()>;
}

/// Who the current process is, for policy lookup and audit attribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub name: String,
    pub pid: u32,
    pub uid: u32,
}

/// Application identity from a process command line: the first argument without any
/// `:subprocess` suffix or leading directories
pub fn identity_from_cmdline(arg0: &str) -> String {
    let base = arg0.split(':').next().unwrap_or(arg0);
    Path::new(base)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| base.to_string())
}

impl ProcessIdentity {
    pub fn new(name: impl Into<String>, pid: u32, uid: u32) -> Self {
        Self {
            name: name.into(),
            pid,
            uid,
        }
    }

    /// Identity of the running process
    pub fn current() -> Self {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

        let pid = std::process::id();
        let uid = nix::unistd::getuid().as_raw();

        let mut system = System::new();
        let sys_pid = Pid::from_u32(pid);
        // the plain refresh leaves cmd empty and `name` is the kernel comm, cut at 15 bytes
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let name = system
            .process(sys_pid)
            .and_then(|process| {
                process
                    .cmd()
                    .first()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .or_else(|| Some(process.name().to_string_lossy().into_owned()))
            })
            .map(|arg0| identity_from_cmdline(&arg0))
            .unwrap_or_default();

        Self { name, pid, uid }
    }
}

fn status_of<T>(outcome: &io::Result<T>) -> i32 {
    match outcome {
        Ok(_) => 0,
        Err(e) => e.raw_os_error().unwrap_or(libc::EIO),
    }
}

fn nix_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// Translate `open(2)` flags into `OpenOptions`
fn open_options(flags: i32, mode: u32) -> OpenOptions {
    let mut options = OpenOptions::new();
    let read_only = match flags & libc::O_ACCMODE {
        libc::O_WRONLY => {
            options.write(true);
            false
        }
        libc::O_RDWR => {
            options.read(true).write(true);
            false
        }
        _ => {
            options.read(true);
            true
        }
    };
    let creation = libc::O_TRUNC | libc::O_CREAT | libc::O_EXCL;
    let mut handled = libc::O_ACCMODE | libc::O_APPEND;
    if flags & libc::O_APPEND != 0 {
        options.append(true);
    }
    // std rejects create/truncate without write access; the kernel accepts them
    if !read_only {
        handled |= creation;
        if flags & libc::O_TRUNC != 0 {
            options.truncate(true);
        }
        if flags & libc::O_CREAT != 0 {
            if flags & libc::O_EXCL != 0 {
                options.create_new(true);
            } else {
                options.create(true);
            }
        }
    }
    options.custom_flags(flags & !handled).mode(mode);
    options
}

/// Filesystem adapter enforcing the policy of one process
pub struct GuardedFs {
    store: Arc<ConfigStore>,
    engine: DecisionEngine,
    audit: AuditLogger,
    identity: ProcessIdentity,
    enabled: bool,
    operations: AtomicU64,
}

impl std::fmt::Debug for GuardedFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedFs")
            .field("identity", &self.identity)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl GuardedFs {
    /// Bind to `identity`. Processes that should not be hooked get a pass-through adapter.
    pub fn new(store: Arc<ConfigStore>, identity: ProcessIdentity, sink: Arc<dyn AuditSink>) -> Self {
        let enabled = store.should_hook(&identity.name, identity.uid);
        if !enabled {
            debug!("Not hooking {} (uid {})", identity.name, identity.uid);
        }
        let engine = DecisionEngine::new(store.clone(), identity.name.clone());
        let audit = AuditLogger::new(store.clone(), identity.name.clone(), sink).with_process(identity.pid, identity.uid);
        Self {
            store,
            engine,
            audit,
            identity,
            enabled,
            operations: AtomicU64::new(0),
        }
    }

    /// Bootstrap for the running process: load the policy, install the log backend at
    /// the configured `logLevel` and bind to the process identity.
    pub fn for_current_process(store: Arc<ConfigStore>, sink: Arc<dyn AuditSink>) -> Self {
        store.initialize();
        init_logging(store.global().level_filter());
        Self::new(store, ProcessIdentity::current(), sink)
    }

    /// Full process bootstrap: policy from `config_dir`, events to the collector socket
    /// named in `collector`.
    pub fn bootstrap(config_dir: impl AsRef<Path>, collector: &CollectorConfiguration) -> Result<Self, SinkError> {
        let store = Arc::new(ConfigStore::from_directory(config_dir));
        let sink = Arc::new(SocketSink::from_config(collector)?);
        Ok(Self::for_current_process(store, sink))
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count one operation and poll for a policy update every `opCheckInterval` operations
    fn tick(&self) {
        let count = self.operations.fetch_add(1, Ordering::Relaxed) + 1;
        let interval = u64::from(self.store.snapshot().global.update.op_check_interval.max(1));
        if count % interval == 0 {
            self.store.check_for_update();
        }
    }

    /// Evaluate, run `real` on the effective path unless denied, then audit
    fn guarded<T>(
        &self,
        operation: Operation,
        path: &str,
        flags: i32,
        real: impl FnOnce(&str) -> io::Result<T>,
    ) -> io::Result<T> {
        self.tick();
        if !self.enabled {
            return real(path);
        }

        let result = self.engine.evaluate(path, operation, flags);
        let outcome = match result.decision {
            Decision::DenyReadOnly => Err(io::Error::from_raw_os_error(libc::EACCES)),
            _ => real(result.effective_path(path)),
        };
        self.audit.log_operation(operation, path, &result, status_of(&outcome));
        outcome
    }
}

impl Interceptor for GuardedFs {
    fn open(&self, path: &str, flags: i32, mode: u32) -> io::Result<File> {
        self.guarded(Operation::Open, path, flags, |p| open_options(flags, mode).open(p))
    }

    fn openat(&self, dir: &Path, path: &str, flags: i32, mode: u32) -> io::Result<File> {
        if !path.starts_with('/') {
            self.tick();
            return open_options(flags, mode).open(dir.join(path));
        }
        self.open(path, flags, mode)
    }

    fn access(&self, path: &str, mode: AccessFlags) -> io::Result<()> {
        self.guarded(Operation::Access, path, 0, |p| nix::unistd::access(p, mode).map_err(nix_to_io))
    }

    fn stat(&self, path: &str) -> io::Result<Metadata> {
        self.guarded(Operation::Stat, path, 0, |p| std::fs::metadata(p))
    }

    fn lstat(&self, path: &str) -> io::Result<Metadata> {
        self.guarded(Operation::Stat, path, 0, |p| std::fs::symlink_metadata(p))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.guarded(Operation::Rename, from, 0, |p| std::fs::rename(p, to))
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        self.guarded(Operation::Unlink, path, 0, |p| std::fs::remove_file(p))
    }

    fn mkdir(&self, path: &str, mode: u32) -> io::Result<()> {
        self.guarded(Operation::Mkdir, path, 0, |p| std::fs::DirBuilder::new().mode(mode).create(p))
    }

    fn rmdir(&self, path: &str) -> io::Result<()> {
        self.guarded(Operation::Rmdir, path, 0, |p| std::fs::remove_dir(p))
    }
}
