use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kingside_record::{FileStore, MatchStore, MemoryStore};
use kingside_server::persistence::spawn_writer;
use kingside_server::{
    Authenticator, CoordinatorHandle, MatchCoordinator, MonotonicTime, ServerConfig, Session,
    TokenAuthenticator, transport,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "kingside-server", about = "Live chess match server")]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if config.tokens.is_empty() {
        tracing::warn!("no tokens configured; every connection will fail authentication");
    }

    let store: Box<dyn MatchStore> = match &config.record_dir {
        Some(dir) => Box::new(
            FileStore::open(dir)
                .with_context(|| format!("opening record dir {}", dir.display()))?,
        ),
        None => Box::new(MemoryStore::new()),
    };
    let (writer, writer_task) = spawn_writer(store);

    let session: Session = Session::new(config.session_config(), Box::new(writer));
    let coordinator = MatchCoordinator::new(session, Arc::new(MonotonicTime::new()));
    let (handle, inbound) = CoordinatorHandle::channel(config.inbound_queue_capacity);
    let coordinator_task = tokio::spawn(coordinator.run(inbound, config.clock_check_interval()));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    let auth: Arc<dyn Authenticator> = Arc::new(TokenAuthenticator::new(&config.tokens));
    let config = Arc::new(config);

    tokio::select! {
        result = transport::serve(listener, config, auth, handle) => {
            result.context("accept loop failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    // Connection tasks still hold coordinator handles, so stop it explicitly
    coordinator_task.abort();
    let _ = coordinator_task.await;
    let _ = writer_task.await;
    Ok(())
}
