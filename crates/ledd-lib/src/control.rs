//! Control loop: the one thread that touches the runtime.
//!
//! Connection threads send [`LoopEvent::Request`]s over a channel; the loop
//! dispatches them one at a time and, between messages, runs effect ticks
//! whose deadline has passed. Waiting is a `recv_timeout` up to the earliest
//! deadline, so an idle daemon with no effects sleeps in `recv`.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

use crate::dispatch::Dispatcher;
use crate::runtime::Runtime;

pub enum LoopEvent {
    /// One framed request line and where to send the reply (`None` = no reply).
    Request {
        line: String,
        reply: Sender<Option<String>>,
    },
    Shutdown,
}

/// Cloneable sender side of the control loop.
#[derive(Clone)]
pub struct LoopHandle {
    tx: Sender<LoopEvent>,
}

impl LoopHandle {
    /// Submit `line` and block until the loop has handled it.
    ///
    /// Returns `None` if the loop is gone, `Some(None)` if the line got no
    /// response.
    pub fn request(&self, line: String) -> Option<Option<String>> {
        let (reply, rx) = mpsc::channel();
        self.tx.send(LoopEvent::Request { line, reply }).ok()?;
        rx.recv().ok()
    }

    /// Ask the loop to stop. Harmless if it already has.
    pub fn shutdown(&self) {
        let _ = self.tx.send(LoopEvent::Shutdown);
    }
}

pub struct ControlLoop {
    runtime: Runtime,
    dispatcher: Dispatcher,
    rx: Receiver<LoopEvent>,
}

impl ControlLoop {
    pub fn new(runtime: Runtime) -> (Self, LoopHandle) {
        let (tx, rx) = mpsc::channel();
        let control = ControlLoop {
            runtime,
            dispatcher: Dispatcher::new(),
            rx,
        };
        (control, LoopHandle { tx })
    }

    /// Run until shutdown or until every handle is dropped. Effects are
    /// stopped and controllers closed before the runtime is handed back.
    pub fn run(mut self) -> Runtime {
        log::debug!("control loop running");
        loop {
            self.runtime.run_due_ticks(Instant::now());

            let event = match self.runtime.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(wait) {
                        Ok(ev) => ev,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(ev) => ev,
                    Err(_) => break,
                },
            };

            match event {
                LoopEvent::Request { line, reply } => {
                    let response = self.dispatcher.handle(&mut self.runtime, &line);
                    // The client may have hung up meanwhile.
                    let _ = reply.send(response);
                }
                LoopEvent::Shutdown => {
                    log::info!("shutdown requested");
                    break;
                }
            }
        }
        self.runtime.shutdown();
        self.runtime
    }
}
