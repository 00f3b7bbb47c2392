//! CLI argument parsing and validation module
//!
//! Handles the command-line interface using clap:
//! - Policy inspection (`check`, `show`)
//! - Policy management (`app`) and version bumps (`reload`)
//! - The audit collector (`collect`, `logs`, `ping`)

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use storage_redirect::constants::{APP_UID_THRESHOLD, DEFAULT_CONFIG_DIR, ENV_CONFIG_DIR};
use storage_redirect::daemon::access_log::LogQuery;
use storage_redirect::models::Operation;

/// Entries shown by `logs` when `-n` is not given
const DEFAULT_TAIL_COUNT: usize = 50;

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub config_dir: PathBuf,
    pub command: CliCommand,
}

#[derive(Debug, Clone)]
pub enum CliCommand {
    Check {
        app: String,
        uid: u32,
        operation: Operation,
        flags: i32,
        path: String,
        json: bool,
    },
    Show {
        app: String,
        uid: u32,
        json: bool,
    },
    Reload,
    Collect {
        config: Option<PathBuf>,
    },
    App(AppAction),
    Logs {
        config: Option<PathBuf>,
        query: LogQuery,
        count: usize,
        offset: usize,
        json: bool,
    },
    ClearLogs {
        config: Option<PathBuf>,
        pkg: Option<String>,
    },
    LogStats {
        config: Option<PathBuf>,
        json: bool,
    },
    Ping {
        config: Option<PathBuf>,
        json: bool,
    },
}

/// `app` subcommands
#[derive(Debug, Clone)]
pub enum AppAction {
    List { json: bool },
    Get { app: String },
    Set { app: String, file: PathBuf },
    Delete { app: String },
}

fn app_arg() -> Arg {
    Arg::new("app")
        .short('a')
        .long("app")
        .value_name("ID")
        .help("Application identity (package name)")
        .required(true)
}

fn uid_arg() -> Arg {
    Arg::new("uid")
        .short('u')
        .long("uid")
        .value_name("UID")
        .help("Process uid used for the hook decision (default 10000)")
        .value_parser(clap::value_parser!(u32))
}

fn json_arg() -> Arg {
    Arg::new("json")
        .short('j')
        .long("json")
        .help("Output in JSON format")
        .action(ArgAction::SetTrue)
}

fn collector_config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Collector configuration file (TOML)")
        .value_parser(clap::value_parser!(PathBuf))
}

pub fn build_command() -> Command {
    Command::new("storage-redirect")
        .version(env!("STORAGE_REDIRECT_VERSION"))
        .about("Per-application filesystem redirect and read-only policy")
        .long_about(
            "Inspect per-application storage policies and run the audit collector that records \
             redirected, denied and monitored filesystem operations.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config-dir")
                .long("config-dir")
                .value_name("DIR")
                .help("Policy configuration directory")
                .env(ENV_CONFIG_DIR)
                .default_value(DEFAULT_CONFIG_DIR)
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .subcommand(
            Command::new("check")
                .about("Evaluate one operation against an application's policy")
                .arg(app_arg())
                .arg(uid_arg())
                .arg(
                    Arg::new("op")
                        .short('o')
                        .long("op")
                        .value_name("OP")
                        .help("Operation to evaluate")
                        .required(true)
                        .value_parser(Operation::ALL.map(|op| op.as_str())),
                )
                .arg(
                    Arg::new("flags")
                        .short('f')
                        .long("flags")
                        .value_name("MODE")
                        .help("Access mode for open")
                        .value_parser(["read", "write", "rdwr"])
                        .default_value("read"),
                )
                .arg(Arg::new("path").value_name("PATH").help("Absolute path").required(true))
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("show")
                .about("Show the resolved policy of an application")
                .arg(app_arg())
                .arg(uid_arg())
                .arg(json_arg()),
        )
        .subcommand(Command::new("reload").about("Publish a new policy version so hooked processes reload"))
        .subcommand(
            Command::new("app")
                .about("Manage per-application policy documents")
                .subcommand_required(true)
                .subcommand(
                    Command::new("list")
                        .about("List applications with an active policy")
                        .arg(json_arg()),
                )
                .subcommand(Command::new("get").about("Print an application's policy document").arg(app_arg()))
                .subcommand(
                    Command::new("set")
                        .about("Validate and store a policy document, then publish a new version")
                        .arg(app_arg())
                        .arg(
                            Arg::new("file")
                                .value_name("FILE")
                                .help("Policy document (JSON)")
                                .required(true)
                                .value_parser(clap::value_parser!(PathBuf)),
                        ),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Remove an application's policy, then publish a new version")
                        .arg(app_arg()),
                ),
        )
        .subcommand(
            Command::new("collect")
                .about("Run the audit collector in the foreground")
                .arg(collector_config_arg()),
        )
        .subcommand(
            Command::new("logs")
                .about("Show the newest access log entries")
                .arg(collector_config_arg())
                .arg(
                    Arg::new("pkg")
                        .short('p')
                        .long("pkg")
                        .value_name("ID")
                        .help("Only entries from this application"),
                )
                .arg(
                    Arg::new("op")
                        .short('o')
                        .long("op")
                        .value_name("OP")
                        .help("Only entries for this operation (repeatable)")
                        .action(ArgAction::Append)
                        .value_parser(Operation::ALL.map(|op| op.as_str())),
                )
                .arg(
                    Arg::new("from")
                        .long("from")
                        .value_name("MS")
                        .help("Only entries at or after this Unix time in milliseconds")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    Arg::new("to")
                        .long("to")
                        .value_name("MS")
                        .help("Only entries at or before this Unix time in milliseconds")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    Arg::new("contains")
                        .long("contains")
                        .value_name("TEXT")
                        .help("Only entries whose stored line contains TEXT"),
                )
                .arg(
                    Arg::new("count")
                        .short('n')
                        .value_name("N")
                        .help("Number of entries (default 50)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("offset")
                        .long("offset")
                        .value_name("N")
                        .help("Skip the first N matching entries")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("clear")
                        .long("clear")
                        .help("Remove entries, all of them or only those of --pkg")
                        .action(ArgAction::SetTrue)
                        .conflicts_with_all(["op", "from", "to", "contains", "count", "offset", "stats"]),
                )
                .arg(
                    Arg::new("stats")
                        .long("stats")
                        .help("Show access log size and application count")
                        .action(ArgAction::SetTrue)
                        .conflicts_with_all(["pkg", "op", "from", "to", "contains", "count", "offset"]),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("ping")
                .about("Check that the audit collector is running")
                .arg(collector_config_arg())
                .arg(json_arg()),
        )
}

fn parse_flags(mode: &str) -> i32 {
    match mode {
        "write" => libc::O_WRONLY,
        "rdwr" => libc::O_RDWR,
        _ => libc::O_RDONLY,
    }
}

fn required_string(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow!("Missing required argument: {}", id))
}

fn parse_operation(matches: &ArgMatches, id: &str) -> Result<Option<Operation>> {
    matches
        .get_one::<String>(id)
        .map(|op| op.parse::<Operation>())
        .transpose()
}

fn parse_operations(matches: &ArgMatches, id: &str) -> Result<Vec<Operation>> {
    matches
        .get_many::<String>(id)
        .into_iter()
        .flatten()
        .map(|op| op.parse::<Operation>())
        .collect()
}

fn parse_app_action(matches: &ArgMatches) -> Result<AppAction> {
    Ok(match matches.subcommand() {
        Some(("list", sub)) => AppAction::List { json: sub.get_flag("json") },
        Some(("get", sub)) => AppAction::Get { app: required_string(sub, "app")? },
        Some(("set", sub)) => AppAction::Set {
            app: required_string(sub, "app")?,
            file: sub
                .get_one::<PathBuf>("file")
                .cloned()
                .ok_or_else(|| anyhow!("Missing required argument: file"))?,
        },
        Some(("delete", sub)) => AppAction::Delete { app: required_string(sub, "app")? },
        _ => return Err(anyhow!("No app command given")),
    })
}

/// Parse command line arguments and return configuration
pub fn parse_args() -> Result<CliConfig> {
    parse_from(build_command().get_matches())
}

fn parse_from(matches: ArgMatches) -> Result<CliConfig> {
    let config_dir = matches
        .get_one::<PathBuf>("config-dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

    let command = match matches.subcommand() {
        Some(("check", sub)) => {
            let path = required_string(sub, "path")?;
            if !path.starts_with('/') {
                return Err(anyhow!("Path must be absolute: {}", path));
            }
            CliCommand::Check {
                app: required_string(sub, "app")?,
                uid: sub.get_one::<u32>("uid").copied().unwrap_or(APP_UID_THRESHOLD),
                operation: parse_operation(sub, "op")?.ok_or_else(|| anyhow!("Missing required argument: op"))?,
                flags: parse_flags(sub.get_one::<String>("flags").map(String::as_str).unwrap_or("read")),
                path,
                json: sub.get_flag("json"),
            }
        }
        Some(("show", sub)) => CliCommand::Show {
            app: required_string(sub, "app")?,
            uid: sub.get_one::<u32>("uid").copied().unwrap_or(APP_UID_THRESHOLD),
            json: sub.get_flag("json"),
        },
        Some(("reload", _)) => CliCommand::Reload,
        Some(("collect", sub)) => CliCommand::Collect {
            config: sub.get_one::<PathBuf>("config").cloned(),
        },
        Some(("app", sub)) => CliCommand::App(parse_app_action(sub)?),
        Some(("logs", sub)) => {
            let config = sub.get_one::<PathBuf>("config").cloned();
            let pkg = sub.get_one::<String>("pkg").cloned();
            if sub.get_flag("clear") {
                CliCommand::ClearLogs { config, pkg }
            } else if sub.get_flag("stats") {
                CliCommand::LogStats {
                    config,
                    json: sub.get_flag("json"),
                }
            } else {
                CliCommand::Logs {
                    config,
                    query: LogQuery {
                        pkg,
                        ops: parse_operations(sub, "op")?,
                        from: sub.get_one::<i64>("from").copied(),
                        to: sub.get_one::<i64>("to").copied(),
                        contains: sub.get_one::<String>("contains").cloned(),
                    },
                    count: sub.get_one::<usize>("count").copied().unwrap_or(DEFAULT_TAIL_COUNT),
                    offset: sub.get_one::<usize>("offset").copied().unwrap_or(0),
                    json: sub.get_flag("json"),
                }
            }
        }
        Some(("ping", sub)) => CliCommand::Ping {
            config: sub.get_one::<PathBuf>("config").cloned(),
            json: sub.get_flag("json"),
        },
        _ => return Err(anyhow!("No command given")),
    };

    Ok(CliConfig { config_dir, command })
}
