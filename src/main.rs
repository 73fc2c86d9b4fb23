//! Switchboard - multi-tenant messaging gateway

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use switchboard::{
    config::Args,
    db::{MongoAdminStore, MongoAuditLog, MongoClient, MongoTenantStore},
    logging,
    protocol::BridgeConnector,
    registry::SessionRegistry,
    server::{self, AppState, Stores},
    session::HttpFetcher,
    store::{FileCredentialStore, MemoryAdminStore, MemoryAuditLog, MemoryTenantStore},
    supervisor::Supervisor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.json_logs());

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Switchboard messaging gateway");
    info!("  v{}", env!("CARGO_PKG_VERSION"));
    info!("======================================");

    let stores = match connect_stores(&args).await {
        Ok(stores) => stores,
        Err(e) if args.dev_mode => {
            warn!("MongoDB unavailable (dev mode, using in-memory stores): {}", e);
            Stores::new(
                Arc::new(MemoryTenantStore::new()),
                Arc::new(MemoryAdminStore::new()),
                Arc::new(MemoryAuditLog::new()),
            )
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    stores
        .seed_admin(&args)
        .await
        .context("seeding admin account")?;

    let credentials = FileCredentialStore::open(&args.auth_dir, args.credentials_key.clone())
        .await
        .with_context(|| format!("opening credential store at {}", args.auth_dir.display()))?;
    if args.credentials_key.is_none() {
        warn!("CREDENTIALS_KEY not set - resume material is stored unencrypted");
    }

    let bridge_url = args
        .bridge_url()
        .context("BRIDGE_URL is required outside dev mode")?
        .to_string();
    info!("Protocol bridge: {}", bridge_url);
    let connector = BridgeConnector::new(bridge_url, args.request_timeout());

    let fetcher = HttpFetcher::new(args.fetch_timeout(), args.max_document_bytes)
        .context("building document fetcher")?;

    let registry = SessionRegistry::new(
        Arc::clone(&stores.directory),
        Arc::new(connector),
        Arc::new(credentials),
        Arc::new(fetcher),
        args.session_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&registry),
        Arc::clone(&stores.directory),
        args.supervisor_config(),
    ));
    let supervisor_handle = supervisor.spawn(shutdown_rx.clone());

    let state = Arc::new(AppState::new(args, stores, registry));
    let server_handle = tokio::spawn(server::run(state, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server error: {:?}", e),
        Err(e) => error!("Server task failed: {}", e),
    }
    if let Err(e) = supervisor_handle.await {
        warn!("Supervisor task failed: {}", e);
    }

    info!("Switchboard stopped");
    Ok(())
}

async fn connect_stores(args: &Args) -> anyhow::Result<Stores> {
    let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    let audit = MongoAuditLog::new(&client).await?;
    let admins = MongoAdminStore::new(&client).await?;
    let tenants = MongoTenantStore::new(client).await?;
    info!("Connected to MongoDB database '{}'", args.mongodb_db);
    Ok(Stores::new(Arc::new(tenants), Arc::new(admins), Arc::new(audit)))
}
