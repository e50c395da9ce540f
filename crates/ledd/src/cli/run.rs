//! `run` subcommand: the daemon itself.

use std::net::TcpListener;
use std::path::Path;

use ledd_lib::daemon::{self, Daemon, StoreLocation};

use super::{Config, LeddError, Result, RunOptions, load_config};

/// Apply command line overrides on top of the file config.
fn apply_overrides(config: &mut Config, opts: &RunOptions) {
    if let Some(host) = &opts.host {
        config.host = host.clone();
    }
    if let Some(port) = opts.port {
        config.port = port;
    }
    if let Some(store) = &opts.store {
        config.store_path = store.display().to_string();
    }
}

fn store_location(config: &Config, opts: &RunOptions) -> StoreLocation {
    if opts.ephemeral {
        StoreLocation::Memory
    } else {
        config.store_location()
    }
}

pub(super) fn cmd_run(opts: RunOptions, custom_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(custom_path);
    apply_overrides(&mut config, &opts);
    if let Err(errors) = config.validate() {
        let msg: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(LeddError::Config(msg.join("; ")));
    }

    let runtime = daemon::build_platform_runtime(&config, &store_location(&config, &opts))?;

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).map_err(|e| {
        LeddError::Io(std::io::Error::new(e.kind(), format!("bind {addr}: {e}")))
    })?;
    let daemon = Daemon::start(listener, runtime)?;
    println!("ledd {} listening on {}", ledd_lib::dispatch::VERSION, daemon.local_addr());

    let handle = daemon.handle();
    if let Err(e) = ctrlc::set_handler(move || handle.shutdown()) {
        log::warn!("could not install Ctrl+C handler: {e}");
    }

    daemon.wait()?;
    println!("ledd stopped");
    Ok(())
}
