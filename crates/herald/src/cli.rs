//! Command-line interface for the herald node.
//!
//! Every option overrides the matching value from the configuration file.

use crate::config::AppConfig;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for this process's id
    pub process_id: Option<String>,
    /// Optional override for the record directory
    pub data_dir: Option<PathBuf>,
    /// Optional override for the peer list
    pub peers: Option<Vec<String>>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

fn command() -> Command {
    Command::new("herald")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Join/leave announcement node for proxy + backend networks (JSON lines on stdin/stdout)")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("herald.toml"),
        )
        .arg(
            Arg::new("process-id")
                .long("process-id")
                .value_name("ID")
                .help("Unique id of this process in the network"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Player record directory"),
        )
        .arg(
            Arg::new("peer")
                .long("peer")
                .value_name("ID")
                .help("Replication peer (repeatable)")
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("herald.toml")),
            process_id: matches.get_one::<String>("process-id").cloned(),
            data_dir: matches.get_one::<String>("data-dir").map(PathBuf::from),
            peers: matches
                .get_many::<String>("peer")
                .map(|peers| peers.cloned().collect()),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }

    /// Applies the overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(process_id) = &self.process_id {
            config.node.process_id = process_id.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.store.data_dir = Some(data_dir.clone());
        }
        if let Some(peers) = &self.peers {
            config.node.peers = peers.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
    }
}
