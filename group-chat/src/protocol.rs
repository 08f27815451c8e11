//! Newline-delimited text protocol shared by the server and the client.
//!
//! The first line a client sends is its display name. Every line after that is
//! chat text. The server only ever writes plain lines back: the greeting, join
//! notices, and `<name>: <text>` relays.
//!
//! Incoming lines are read with [`tokio::io::AsyncBufReadExt::lines`], which
//! strips `\n` and `\r\n` and is safe to poll from `select!`.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Sent to a client, and only to that client, once its name has been read.
pub const GREETING: &str = "Greetings, begin typing to chat:";

/// Line announcing a newly named client to everybody else.
pub fn join_notice(name: &str) -> String {
    format!("{name} joined the chat")
}

/// Line relayed to the other clients when `name` says `text`.
pub fn chat_line(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}

/// Writes `line` plus a newline and flushes before returning.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
