use std::path::PathBuf;

use anyhow::Context;
use memtls_server::{Server, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => ServerConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };

    let server = Server::bind(&config)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %server.local_addr()?, "memtls node listening");

    server
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(%err, "cannot listen for ctrl-c");
            }
        })
        .await?;
    Ok(())
}
