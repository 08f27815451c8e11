//! Per-connection state machine.
//!
//! A session moves through `Connected -> Named -> Active -> Closed`. It is
//! registered only while `Active` (and for the instant between register and
//! announce), and it tears down along one path regardless of which side of
//! the connection failed first.

use std::{fmt, io, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite},
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{self, write_line},
    registry::{ClientId, ConnectionHandle, Registry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Named,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Connected => "connected",
            SessionState::Named => "named",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed before sending a name.
    ClosedBeforeName,
    ReadFailedBeforeName(io::Error),
    GreetingFailed(io::Error),
    /// Normal end of stream while active.
    Disconnected,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

impl SessionEnd {
    /// Whether the session was ever placed in the registry.
    pub fn was_registered(&self) -> bool {
        matches!(
            self,
            SessionEnd::Disconnected | SessionEnd::ReadFailed(_) | SessionEnd::WriteFailed(_)
        )
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub id: ClientId,
    pub name: Option<String>,
    pub lines_relayed: u64,
    pub end: SessionEnd,
}

/// Static inputs of one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: ClientId,
    pub peer: Option<SocketAddr>,
    pub outbox_capacity: usize,
}

/// Drives one client connection from accept to close.
///
/// `reader` and `writer` are the two halves of the same connection. The
/// writer is handed to a dedicated outbox task once the greeting has been
/// sent, so broadcasts from other sessions never wait on this socket.
pub async fn run_session<R, W>(
    reader: R,
    mut writer: W,
    registry: Arc<Registry>,
    ctx: SessionContext,
) -> SessionReport
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let SessionContext {
        id,
        peer,
        outbox_capacity,
    } = ctx;
    transition(id, SessionState::Connected);
    let mut lines = reader.lines();

    let name = match lines.next_line().await {
        Ok(Some(name)) => name,
        Ok(None) => return closed_early(id, None, SessionEnd::ClosedBeforeName),
        Err(err) => return closed_early(id, None, SessionEnd::ReadFailedBeforeName(err)),
    };
    transition(id, SessionState::Named);

    if let Err(err) = write_line(&mut writer, protocol::GREETING).await {
        return closed_early(id, Some(name), SessionEnd::GreetingFailed(err));
    }

    let (outbox_tx, outbox_rx) = mpsc::channel(outbox_capacity.max(1));
    let mut outbox_task = tokio::spawn(drain_outbox(outbox_rx, writer));
    let handle = ConnectionHandle::new(id, outbox_tx);

    if !registry.register(handle.clone()).await {
        warn!(client = id, "client id was already registered");
    }
    let notified = registry
        .announce(&handle, &protocol::join_notice(&name))
        .await;
    info!(client = id, ?peer, %name, notified, "client joined");
    transition(id, SessionState::Active);

    let mut lines_relayed = 0;
    let end = loop {
        select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    registry
                        .broadcast(&handle, &protocol::chat_line(&name, &text))
                        .await;
                    lines_relayed += 1;
                }
                Ok(None) => break SessionEnd::Disconnected,
                Err(err) => break SessionEnd::ReadFailed(err),
            },
            finished = &mut outbox_task => {
                break SessionEnd::WriteFailed(outbox_failure(finished));
            }
        }
    };

    teardown(&registry, &handle, &outbox_task).await;
    info!(
        client = id,
        ?peer,
        %name,
        lines_relayed,
        registered = end.was_registered(),
        end = ?end,
        "client left"
    );

    SessionReport {
        id,
        name: Some(name),
        lines_relayed,
        end,
    }
}

async fn drain_outbox<W>(mut outbox: mpsc::Receiver<String>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbox.recv().await {
        write_line(&mut writer, &line).await?;
    }
    Ok(())
}

fn outbox_failure(finished: Result<io::Result<()>, tokio::task::JoinError>) -> io::Error {
    match finished {
        Ok(Err(err)) => err,
        Ok(Ok(())) => io::Error::new(io::ErrorKind::BrokenPipe, "outbox closed"),
        Err(join_err) => io::Error::other(join_err),
    }
}

async fn teardown(
    registry: &Registry,
    handle: &ConnectionHandle,
    outbox_task: &JoinHandle<io::Result<()>>,
) {
    registry.unregister(handle).await;
    // Queued lines are discarded; dropping the task drops the write half.
    outbox_task.abort();
    transition(handle.id(), SessionState::Closed);
}

/// Ends a session that never reached the registry.
fn closed_early(id: ClientId, name: Option<String>, end: SessionEnd) -> SessionReport {
    debug!(
        client = id,
        ?name,
        registered = end.was_registered(),
        end = ?end,
        "connection closed before joining"
    );
    transition(id, SessionState::Closed);
    SessionReport {
        id,
        name,
        lines_relayed: 0,
        end,
    }
}

fn transition(id: ClientId, state: SessionState) {
    debug!(client = id, %state, "session state");
}
