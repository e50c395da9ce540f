//! CLI subcommands: run the daemon, inspect config, talk to a running daemon.

mod config_cmd;
mod run;
mod send;

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};

pub(super) use ledd_lib::config::Config;
pub(super) use ledd_lib::error::{LeddError, Result};

const PADDING: usize = 2;

/// Alignment width for key-value output: the longest key plus padding,
/// with indented keys aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{key:<width$}{value}", width = w);
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

/// Config file in effect: `--config` if given, else the platform default.
pub(super) fn config_path(custom: Option<&Path>) -> Option<PathBuf> {
    custom.map(Path::to_path_buf).or_else(Config::path)
}

/// Load the config, logging parse warnings.
pub(super) fn load_config(custom: Option<&Path>) -> Config {
    let Some(path) = config_path(custom) else {
        return Config::default();
    };
    let (config, warnings) = Config::load_from(&path);
    for w in &warnings {
        log::warn!("{w}");
    }
    config
}

#[derive(Debug, Args)]
pub struct RunOptions {
    /// Address to listen on (overrides config)
    #[arg(long)]
    pub host: Option<String>,
    /// TCP port (overrides config)
    #[arg(long)]
    pub port: Option<u16>,
    /// Store file (overrides config)
    #[arg(long, value_name = "PATH", conflicts_with = "ephemeral")]
    pub store: Option<PathBuf>,
    /// Keep controller and stripe definitions in memory only
    #[arg(long)]
    pub ephemeral: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground
    Run(RunOptions),

    /// Show current configuration and file paths
    Config,

    /// Send one JSON request to a running daemon and print the reply
    Send {
        /// Request object, e.g. '{"action":"discover"}'
        request: String,
        /// Daemon address (default: 127.0.0.1 and the configured port)
        #[arg(long, value_name = "HOST:PORT")]
        addr: Option<String>,
    },
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, json: bool, config: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Run(opts) => {
            if json {
                warn_json_unsupported("run");
            }
            run::cmd_run(opts, config)
        }
        Command::Config => config_cmd::cmd_config(json, config),
        Command::Send { request, addr } => {
            if json {
                warn_json_unsupported("send");
            }
            send::cmd_send(&request, addr.as_deref(), config)
        }
    }
}
