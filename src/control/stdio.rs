//! Stdout output for the client binary.
//!
//! - **stdout**: one JSON document per line, nothing else
//! - **stderr**: logs
//!
//! Lines end in an explicit `\n` rather than going through `println!`.

use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::message::Message;

/// Write a line to stdout and flush it.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_line(&mut handle, line)
}

/// JSON line for a received message: `{"category": ..., "payload": ...}`.
pub fn message_line(message: &Message) -> Result<String> {
    #[derive(Serialize)]
    struct Line<'a> {
        category: &'a str,
        payload: &'a serde_json::Value,
    }

    Ok(serde_json::to_string(&Line {
        category: message.category().as_str(),
        payload: message.payload(),
    })?)
}

fn write_line<W: Write>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}
