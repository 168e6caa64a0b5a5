use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use server::catalog::Catalog;
use server::config::{build_config, Args};
use server::connection_manager::handle_listen_server;
use server::database::DatabaseConnection;
use server::identity::StaticTokens;
use server::{spawn_services, Services};
use tokio::join;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let identities = StaticTokens::load(&config.identities)?;
    if identities.is_empty() {
        warn!(path = %config.identities.display(), "no identities configured, nobody can log in");
    }
    let catalog = Catalog::load(&config.catalog)?;
    info!(categories = catalog.categories.len(), "catalog loaded");

    let database = DatabaseConnection::new(&config.database)
        .await
        .with_context(|| format!("failed to open database at {}", config.database.address))?;
    let Services {
        ledger_tx,
        db_task,
        ledger_task,
    } = spawn_services(database, catalog, config.ledger.clone());

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(address = %config.listen, "listening");

    let identity = Arc::new(identities);
    let listen_server_task = tokio::spawn(async move {
        handle_listen_server(listener, identity, ledger_tx).await;
    });

    let (res1, res2, res3) = join!(db_task, ledger_task, listen_server_task);
    res1?;
    res2?;
    res3?;
    Ok(())
}
