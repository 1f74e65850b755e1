//! Control channel protocol.
//!
//! Line-delimited text commands that edit the routing table at runtime. Every
//! command on a connection is scoped to the uid resolved when that
//! connection was accepted.
//!
//! ```text
//! ADD <addr>       -> "ADDed <addr>\n"
//! DELETE <addr>    -> "DELETEed <addr>\n"
//! LIST             -> one address per line
//! QUIT             -> "" (shuts the whole server down)
//! <empty line>     -> ""
//! anything else    -> "Unknown command <COMMAND>\n"
//! ```
//!
//! `QUIT` is honoured for any identity. `<addr>` is the rest of the line after
//! the whitespace following the command, so it may contain spaces. Addresses
//! must be UTF-8; `ADD`/`DELETE` with any other argument answer
//! `Invalid argument for <COMMAND>\n`. Lines longer than [`MAX_LINE_LEN`]
//! are discarded and answered with `Command too long\n`.

use std::io;
use std::sync::Arc;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, info, warn};

use crate::proxy::{RoutingTable, Uid};
use crate::shutdown::ShutdownSignal;

/// Longest accepted control line, terminator excluded.
pub const MAX_LINE_LEN: usize = 4096;

/// A decoded control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Delete(String),
    List,
    Quit,
    Empty,
    /// `ADD` or `DELETE` with nothing after it.
    MissingArgument(&'static str),
    /// `ADD` or `DELETE` with an argument that is not UTF-8.
    InvalidArgument(&'static str),
    Unknown(String),
}

impl Command {
    /// Parse one line (without its terminating newline).
    pub fn parse(line: &str) -> Self {
        let line = line.trim_start();
        let (name, argument) = match line.find(char::is_whitespace) {
            Some(idx) => (&line[..idx], line[idx..].trim_start()),
            None => (line, ""),
        };

        match name {
            "" => Command::Empty,
            "ADD" if argument.is_empty() => Command::MissingArgument("ADD"),
            "ADD" => Command::Add(argument.to_string()),
            "DELETE" if argument.is_empty() => Command::MissingArgument("DELETE"),
            "DELETE" => Command::Delete(argument.to_string()),
            "LIST" => Command::List,
            "QUIT" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }

    /// Parse one raw line, which need not be UTF-8.
    pub fn parse_bytes(line: &[u8]) -> Self {
        if let Ok(line) = std::str::from_utf8(line) {
            return Self::parse(line);
        }
        match Self::parse(&String::from_utf8_lossy(line)) {
            Command::Add(_) => Command::InvalidArgument("ADD"),
            Command::Delete(_) => Command::InvalidArgument("DELETE"),
            other => other,
        }
    }
}

/// Dispatches control commands against the routing table.
#[derive(Clone)]
pub struct ControlProtocol {
    table: Arc<RoutingTable>,
    shutdown: ShutdownSignal,
}

impl ControlProtocol {
    /// Create a dispatcher over `table` that fires `shutdown` on `QUIT`.
    pub fn new(table: Arc<RoutingTable>, shutdown: ShutdownSignal) -> Self {
        Self { table, shutdown }
    }

    /// Execute one line for `uid` and render its response.
    pub async fn dispatch(&self, uid: Uid, line: &str) -> String {
        self.execute(uid, Command::parse(line)).await
    }

    /// Execute a decoded command for `uid` and render its response.
    pub async fn execute(&self, uid: Uid, command: Command) -> String {
        match command {
            Command::Add(addr) => {
                info!(uid, backend = %addr, "ADD");
                self.table.add(uid, &addr).await;
                format!("ADDed {}\n", addr)
            }
            Command::Delete(addr) => {
                info!(uid, backend = %addr, "DELETE");
                self.table.remove(uid, &addr).await;
                format!("DELETEed {}\n", addr)
            }
            Command::List => {
                debug!(uid, "LIST");
                self.table
                    .list(uid)
                    .await
                    .into_iter()
                    .map(|addr| addr + "\n")
                    .collect()
            }
            Command::Quit => {
                warn!(uid, "QUIT received, shutting down");
                self.shutdown.trigger();
                String::new()
            }
            Command::Empty => String::new(),
            Command::MissingArgument(name) => format!("Missing argument for {}\n", name),
            Command::InvalidArgument(name) => {
                debug!(uid, command = name, "Argument is not UTF-8");
                format!("Invalid argument for {}\n", name)
            }
            Command::Unknown(name) => {
                debug!(uid, command = %name, "Unknown command");
                format!("Unknown command {}\n", name)
            }
        }
    }

    /// Serve a control session until the peer closes.
    ///
    /// Lines are dispatched in arrival order and each response is written
    /// before the next line is read. Returns the number of lines handled.
    pub async fn serve<S>(&self, uid: Uid, stream: S) -> io::Result<u64>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut handled = 0u64;

        loop {
            line.clear();
            let read = (&mut reader)
                .take(MAX_LINE_LEN as u64 + 1)
                .read_until(b'\n', &mut line)
                .await?;
            if read == 0 {
                break;
            }

            let response = if line.last() != Some(&b'\n') && line.len() > MAX_LINE_LEN {
                skip_line(&mut reader).await?;
                warn!(uid, limit = MAX_LINE_LEN, "Control line too long, discarded");
                "Command too long\n".to_string()
            } else {
                self.execute(uid, Command::parse_bytes(trim_terminator(&line)))
                    .await
            };

            if !response.is_empty() {
                writer.write_all(response.as_bytes()).await?;
            }
            handled += 1;
        }

        Ok(handled)
    }
}

/// Strip a trailing `\n` or `\r\n`.
fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Consume input up to and including the next `\n`, or to end-of-stream.
async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        let (consumed, done) = match buf.iter().position(|&b| b == b'\n') {
            Some(idx) => (idx + 1, true),
            None => (buf.len(), false),
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}
