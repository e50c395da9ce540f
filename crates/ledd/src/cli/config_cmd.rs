//! `config` subcommand: show current configuration and file paths.

use std::path::Path;

use serde::Serialize;

use super::{Config, LeddError, Result, config_path, kv, kv_indent, kv_width, load_config};

#[derive(Serialize)]
struct ConfigOutput {
    config_file: Option<String>,
    config_file_exists: bool,
    settings: Config,
    store_file: Option<String>,
    store_file_exists: bool,
    problems: Vec<String>,
}

pub(super) fn cmd_config(json: bool, custom_path: Option<&Path>) -> Result<()> {
    let config = load_config(custom_path);
    let path = config_path(custom_path);
    let exists = path.as_ref().is_some_and(|p| p.exists());
    let store = config.store_file();
    let store_exists = store.as_ref().is_some_and(|p| p.exists());
    let problems: Vec<String> = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(ToString::to_string).collect(),
    };

    if json {
        let output = ConfigOutput {
            config_file: path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: exists,
            settings: config,
            store_file: store.as_ref().map(|p| p.display().to_string()),
            store_file_exists: store_exists,
            problems,
        };
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| LeddError::Config(e.to_string()))?;
        println!("{text}");
        return Ok(());
    }

    let w = kv_width(
        &["Config file:", "Store file:"],
        &[
            "host:",
            "port:",
            "store_path:",
            "tick_interval_ms:",
            "default_gamma:",
            "initial_frequency:",
        ],
    );

    match &path {
        Some(p) if exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Settings:");
    kv_indent("host:", &config.host, w);
    kv_indent("port:", config.port, w);
    let store_label = if config.store_path.trim().is_empty() {
        "(default)".to_string()
    } else {
        config.store_path.clone()
    };
    kv_indent("store_path:", store_label, w);
    kv_indent("tick_interval_ms:", config.tick_interval_ms, w);
    kv_indent("default_gamma:", config.default_gamma, w);
    kv_indent("initial_frequency:", format_args!("{} Hz", config.initial_frequency), w);
    println!();

    match &store {
        Some(p) => {
            let status = if store_exists { "present" } else { "not found" };
            kv("Store file:", format_args!("{} ({status})", p.display()), w);
        }
        None => kv("Store file:", "(no data directory, in-memory)", w),
    }

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(())
}
