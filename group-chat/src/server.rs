use std::{future::Future, io, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    registry::Registry,
    session::{SessionContext, run_session},
};

pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Lines buffered per recipient before further lines to it are dropped.
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Accept loop of the relay.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(addr: SocketAddr, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;
        Ok(Self::new(listener, config))
    }

    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self::with_registry(listener, Arc::new(Registry::new()), config)
    }

    pub fn with_registry(
        listener: TcpListener,
        registry: Arc<Registry>,
        config: ServerConfig,
    ) -> Self {
        Self {
            listener,
            registry,
            config,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves or the listener fails.
    ///
    /// Stopping does not touch running sessions; they end when their
    /// connections do.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            registry,
            config,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server no longer accepting connections");
                    return Ok(());
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, &config)?;
                }
            }
        }
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
    config: &ServerConfig,
) -> Result<()> {
    match result {
        Ok((stream, peer)) => {
            spawn_session(stream, peer, registry, config);
            Ok(())
        }
        Err(err) if is_transient_accept_error(&err) => {
            warn!(error = ?err, "failed to accept connection");
            Ok(())
        }
        Err(err) => Err(err).context("listener failed"),
    }
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<Registry>,
    config: &ServerConfig,
) {
    let registry = Arc::clone(registry);
    let ctx = SessionContext {
        id: registry.next_id(),
        peer: Some(peer),
        outbox_capacity: config.outbox_capacity,
    };
    debug!(client = ctx.id, %peer, "accepted connection");

    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        run_session(BufReader::new(reader), writer, registry, ctx).await;
    });
}
