use anyhow::Result;
use clap::Parser;

use group_chat::{cli::ClientArgs, client};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // Chat lines own stdout; diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    client::run(ClientArgs::parse()).await
}
