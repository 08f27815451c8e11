use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use group_chat::{cli::ServerArgs, server::Server};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = ServerArgs::parse();
    let server = Server::bind(args.listen_addr(), args.config()).await?;
    let addr = server.local_addr()?;
    info!("server listening on {}", addr);

    if let Err(err) = server.run().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
