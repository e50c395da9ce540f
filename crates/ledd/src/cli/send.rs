//! `send` subcommand: one request to a running daemon.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use super::{LeddError, Result, load_config};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse and re-serialize `request` onto a single line. The daemon drops
/// malformed lines silently, so catch them here.
fn request_line(request: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(request)
        .map_err(|e| LeddError::Validation(format!("Request is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(LeddError::Validation("Request must be a JSON object".into()));
    }
    Ok(format!("{value}\n"))
}

pub(super) fn cmd_send(request: &str, addr: Option<&str>, custom_path: Option<&Path>) -> Result<()> {
    let line = request_line(request)?;
    let addr = match addr {
        Some(a) => a.to_string(),
        None => format!("127.0.0.1:{}", load_config(custom_path).port),
    };

    let mut stream = TcpStream::connect(&addr).map_err(|e| {
        LeddError::Io(std::io::Error::new(e.kind(), format!("connect {addr}: {e}")))
    })?;
    stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
    stream.write_all(line.as_bytes())?;
    stream.flush()?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    if reply.is_empty() {
        return Err(LeddError::Protocol("connection closed without reply".into()));
    }
    print!("{reply}");
    Ok(())
}
