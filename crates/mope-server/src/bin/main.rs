//! Index server CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mope_server::{
    install_prometheus_exporter, IndexService, MemoryStore, RedbStore, Server, ServerArgs,
    TreeStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = ServerArgs::parse();
    let tree_config = args.tree_config()?;

    if let Some(addr) = args.metrics_addr {
        install_prometheus_exporter(addr)?;
    }

    let store: Box<dyn TreeStore> = if args.memory {
        tracing::warn!("Using in-memory rows; nothing survives a restart");
        Box::new(MemoryStore::new())
    } else {
        tracing::info!(db = %args.db.display(), "Opening row store");
        Box::new(RedbStore::open(&args.db)?)
    };

    let service = IndexService::open(store, tree_config)?;
    tracing::info!(
        nodes = service.tree().len(),
        balance_threshold = tree_config.balance_threshold,
        "Index ready"
    );

    let server = Server::bind(args.listen, service)
        .await?
        .with_session_timeout(args.session_idle_limit());
    let service = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!(
        inserts = service.stats().inserts(),
        rebuilds = service.stats().rebuilds(),
        "Server stopped"
    );
    Ok(())
}
