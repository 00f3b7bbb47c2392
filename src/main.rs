#![forbid(unsafe_code)]

mod cli;

use anyhow::{bail, Context, Result};
use log::{debug, LevelFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use storage_redirect::audit::{AuditLogger, NullSink};
use storage_redirect::config::{AppDocument, ConfigStore, DirectorySource};
use storage_redirect::daemon::access_log::{AccessLog, LogQuery};
use storage_redirect::daemon::config::CollectorConfiguration;
use storage_redirect::daemon::ipc::{generate_request_id, send_request, IpcMessage, IpcResponse};
use storage_redirect::daemon::run_collector;
use storage_redirect::logging::init_logging;
use storage_redirect::models::Operation;
use storage_redirect::output::{self, CheckReport, ShowReport};
use storage_redirect::policy::DecisionEngine;

use cli::{AppAction, CliCommand};

fn main() -> Result<()> {
    let config = cli::parse_args()?;

    match config.command {
        CliCommand::Check { app, uid, operation, flags, path, json } => {
            init_logging(LevelFilter::Warn);
            run_check(&config.config_dir, app, uid, operation, flags, path, json)
        }
        CliCommand::Show { app, uid, json } => {
            init_logging(LevelFilter::Warn);
            run_show(&config.config_dir, app, uid, json)
        }
        CliCommand::Reload => {
            init_logging(LevelFilter::Warn);
            run_reload(&config.config_dir)
        }
        CliCommand::Collect { config: path } => {
            init_logging(LevelFilter::Info);
            let collector = CollectorConfiguration::load(path.as_deref())?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(run_collector(collector, path))
        }
        CliCommand::App(action) => {
            init_logging(LevelFilter::Warn);
            run_app(&config.config_dir, action)
        }
        CliCommand::Logs { config: path, query, count, offset, json } => {
            init_logging(LevelFilter::Warn);
            run_logs(path, &query, count, offset, json)
        }
        CliCommand::ClearLogs { config: path, pkg } => {
            init_logging(LevelFilter::Warn);
            run_clear_logs(path, pkg)
        }
        CliCommand::LogStats { config: path, json } => {
            init_logging(LevelFilter::Warn);
            run_log_stats(path, json)
        }
        CliCommand::Ping { config: path, json } => {
            init_logging(LevelFilter::Warn);
            run_ping(path, json)
        }
    }
}

fn load_store(config_dir: &Path) -> Arc<ConfigStore> {
    let store = Arc::new(ConfigStore::from_directory(config_dir));
    store.initialize();
    store
}

fn run_check(
    config_dir: &Path,
    app: String,
    uid: u32,
    operation: Operation,
    flags: i32,
    path: String,
    json: bool,
) -> Result<()> {
    let store = load_store(config_dir);
    let engine = DecisionEngine::new(store.clone(), app.clone());
    let result = engine.evaluate(&path, operation, flags);
    let audited = AuditLogger::new(store.clone(), app.clone(), Arc::new(NullSink)).decide(operation, &path, &result);

    let report = CheckReport {
        should_hook: store.should_hook(&app, uid),
        identity: app,
        uid,
        operation,
        flags,
        path,
        result,
        audited,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", output::format_check_human(&report));
    }
    Ok(())
}

fn run_show(config_dir: &Path, app: String, uid: u32, json: bool) -> Result<()> {
    let store = load_store(config_dir);
    let report = ShowReport {
        should_hook: store.should_hook(&app, uid),
        config_version: store.version(),
        policy: store.get_app_config(&app),
        identity: app,
        uid,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", output::format_show_human(&report));
    }
    Ok(())
}

fn run_reload(config_dir: &Path) -> Result<()> {
    let next = DirectorySource::new(config_dir).bump_version()?;
    println!("Published policy version {}", next);
    Ok(())
}

fn run_app(config_dir: &Path, action: AppAction) -> Result<()> {
    let source = DirectorySource::new(config_dir);
    match action {
        AppAction::List { json } => {
            let apps = source.list_apps();
            if json {
                println!("{}", serde_json::to_string_pretty(&apps)?);
            } else if apps.is_empty() {
                println!("No application policies.");
            } else {
                for app in &apps {
                    println!(
                        "{} ({}) redirects={} readonly={}",
                        app.identity,
                        if app.enabled { "enabled" } else { "disabled" },
                        app.redirect_rules,
                        app.read_only_rules
                    );
                }
            }
        }
        AppAction::Get { app } => {
            let doc = source.read_app_document(&app)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        AppAction::Set { app, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read policy document: {}", file.display()))?;
            let doc: AppDocument = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse policy document: {}", file.display()))?;
            source.save_app(&app, doc)?;
            let version = source.bump_version()?;
            println!("Saved policy for {} (version {})", app, version);
        }
        AppAction::Delete { app } => {
            if !source.delete_app(&app)? {
                bail!("No policy for {}", app);
            }
            let version = source.bump_version()?;
            println!("Deleted policy for {} (version {})", app, version);
        }
    }
    Ok(())
}

fn open_access_log(config_path: Option<&Path>) -> Result<(CollectorConfiguration, AccessLog)> {
    let collector = CollectorConfiguration::load(config_path)?;
    let log = AccessLog::open(&collector.collector.log_dir, collector.max_log_bytes())?;
    Ok((collector, log))
}

fn client_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn run_logs(config_path: Option<PathBuf>, query: &LogQuery, count: usize, offset: usize, json: bool) -> Result<()> {
    let (_, log) = open_access_log(config_path.as_deref())?;
    let page = log.query(query, count, offset)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else if page.entries.is_empty() {
        println!("No access log entries.");
    } else {
        for event in &page.entries {
            println!("{}", output::format_event_human(event));
        }
        if let Some(next) = page.next_offset {
            println!("Showing {} of {} entries; next page at --offset {}", page.entries.len(), page.total, next);
        }
    }
    Ok(())
}

/// Ask the collector to clear so it does not race its own appends; without a collector
/// the log is cleared in place.
fn run_clear_logs(config_path: Option<PathBuf>, pkg: Option<String>) -> Result<()> {
    let (collector, log) = open_access_log(config_path.as_deref())?;
    let request = IpcMessage::ClearLog {
        request_id: generate_request_id(),
        pkg: pkg.clone(),
    };

    let removed = match client_runtime()?.block_on(send_request(&collector.collector.socket_path, &request)) {
        Ok(IpcResponse::Success { data, .. }) => data
            .as_ref()
            .and_then(|d| d.get("removed"))
            .and_then(|n| n.as_u64())
            .unwrap_or_default() as usize,
        Ok(IpcResponse::Error { code, message, .. }) => bail!("Collector returned error {}: {}", code, message),
        Err(e) => {
            debug!("Clearing access log directly: {:#}", e);
            log.clear(pkg.as_deref())?
        }
    };

    match pkg {
        Some(pkg) => println!("Removed {} access log entries for {}", removed, pkg),
        None => println!("Removed {} access log entries", removed),
    }
    Ok(())
}

fn run_log_stats(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let (_, log) = open_access_log(config_path.as_deref())?;
    let stats = log.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Access log: {}", log.path().display());
        println!("Size: {} of {} bytes", stats.total_size_bytes, stats.max_size_bytes);
        println!("Applications: {}", stats.app_count);
    }
    Ok(())
}

fn run_ping(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let collector = CollectorConfiguration::load(config_path.as_deref())?;
    let socket = collector.collector.socket_path;
    let request = IpcMessage::Ping { request_id: generate_request_id() };

    let response = client_runtime()?.block_on(send_request(&socket, &request))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    match response {
        IpcResponse::Success { data, .. } => {
            let pid = data
                .as_ref()
                .and_then(|d| d.get("pid"))
                .and_then(|p| p.as_u64())
                .unwrap_or_default();
            println!("✅ Collector is running (pid {}) at {}", pid, socket.display());
            Ok(())
        }
        IpcResponse::Error { code, message, .. } => bail!("Collector returned error {}: {}", code, message),
    }
}
