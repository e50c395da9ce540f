//! TCP front end: one thread per client, newline-delimited JSON.
//!
//! Connection threads only frame bytes into lines. Every complete line is
//! handed to the control loop and the reply (if any) is written back
//! followed by `\n`.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use crate::control::LoopHandle;

/// Accept clients until the listener fails.
pub fn serve(listener: TcpListener, handle: LoopHandle) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let handle = handle.clone();
                let spawned = thread::Builder::new()
                    .name("ledd-client".into())
                    .spawn(move || {
                        let peer = stream.peer_addr().ok();
                        if let Err(e) = handle_client(stream, &handle) {
                            log::debug!("client {}: {e}", describe(peer));
                        }
                    });
                if let Err(e) = spawned {
                    log::warn!("could not spawn client thread: {e}");
                }
            }
            Err(e) => log::warn!("accept failed: {e}"),
        }
    }
}

fn describe(peer: Option<SocketAddr>) -> String {
    peer.map_or_else(|| "?".into(), |p| p.to_string())
}

/// Serve one client until it disconnects or the control loop goes away.
pub fn handle_client(stream: TcpStream, handle: &LoopHandle) -> io::Result<()> {
    let peer = describe(stream.peer_addr().ok());
    log::info!("client {peer} connected");
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let Some(line) = frame(&buf) else {
            log::warn!("client {peer}: undecodable data, ignoring");
            continue;
        };
        if line.is_empty() {
            continue;
        }
        let Some(reply) = handle.request(line.to_owned()) else {
            log::debug!("control loop gone, closing {peer}");
            break;
        };
        if let Some(mut reply) = reply {
            reply.push('\n');
            writer.write_all(reply.as_bytes())?;
            writer.flush()?;
        }
    }
    log::info!("client {peer} disconnected");
    Ok(())
}

/// Strip the line terminator. `None` if the bytes aren't UTF-8.
fn frame(raw: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(raw).ok()?;
    Some(text.trim_end_matches(['\n', '\r']).trim())
}
