//! Daemon assembly: runtime construction, startup restore, and the
//! control/accept threads.

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crate::bus::{BusProvider, PlatformBusProvider};
use crate::config::Config;
use crate::control::{ControlLoop, LoopHandle};
use crate::error::{LeddError, Result};
use crate::runtime::Runtime;
use crate::server;
use crate::store::{JsonStore, MemoryStore, Store};

/// Where controller and stripe definitions live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl StoreLocation {
    pub fn open(&self) -> Result<Box<dyn Store>> {
        match self {
            StoreLocation::File(path) => {
                log::info!("using store {}", path.display());
                Ok(Box::new(JsonStore::open(path)?))
            }
            StoreLocation::Memory => {
                log::info!("using in-memory store, nothing will be saved");
                Ok(Box::new(MemoryStore::new()))
            }
        }
    }
}

/// Open the store and restore every saved controller and stripe.
pub fn build_runtime(
    config: &Config,
    location: &StoreLocation,
    buses: Box<dyn BusProvider>,
) -> Result<Runtime> {
    let store = location.open()?;
    let mut runtime = Runtime::new(store, buses, config.runtime_settings());
    runtime.restore()?;
    Ok(runtime)
}

/// [`build_runtime`] on the real I2C buses.
pub fn build_platform_runtime(config: &Config, location: &StoreLocation) -> Result<Runtime> {
    build_runtime(config, location, Box::new(PlatformBusProvider))
}

/// A running daemon: control loop thread plus accept thread.
pub struct Daemon {
    addr: SocketAddr,
    handle: LoopHandle,
    control: JoinHandle<Runtime>,
}

impl Daemon {
    /// Start serving `listener` with `runtime`.
    pub fn start(listener: TcpListener, runtime: Runtime) -> Result<Daemon> {
        let addr = listener.local_addr()?;
        let (control, handle) = ControlLoop::new(runtime);

        let control = thread::Builder::new()
            .name("ledd-control".into())
            .spawn(move || control.run())?;

        let accept_handle = handle.clone();
        thread::Builder::new()
            .name("ledd-accept".into())
            .spawn(move || server::serve(listener, accept_handle))?;

        log::info!("listening on {addr}");
        Ok(Daemon {
            addr,
            handle,
            control,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle for injecting requests or a shutdown (e.g. from a signal
    /// handler).
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Block until the control loop exits.
    pub fn wait(self) -> Result<Runtime> {
        let Daemon { handle, control, .. } = self;
        // Our own handle must not keep the loop alive.
        drop(handle);
        control
            .join()
            .map_err(|_| LeddError::Io(std::io::Error::other("control loop panicked")))
    }

    /// Stop the control loop and wait for it.
    pub fn shutdown(self) -> Result<Runtime> {
        self.handle.shutdown();
        self.wait()
    }
}
