use std::sync::Arc;

use credit_wallet::api::{self, AppState};
use credit_wallet::config::AppConfig;
use credit_wallet::database::{
    InMemoryIntentRepository, InMemoryLedger, IntentRepository, LedgerRepository,
};
use credit_wallet::gateway::{
    FailoverGateway, HttpGateway, MockGateway, PaymentGateway, WebhookVerifier,
};
use credit_wallet::logging::init_tracing;
use credit_wallet::services::{IntentLocks, IntentTracker, ReconciliationEngine, WalletService};
use credit_wallet::workers::ReconciliationWorker;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = AppConfig::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting credit wallet service");

    let (ledger, intents) = open_stores(&cfg).await?;
    let gateway = build_gateway(&cfg);

    let locks = IntentLocks::new();
    let wallet = Arc::new(WalletService::new(ledger));
    let tracker = Arc::new(IntentTracker::new(
        intents.clone(),
        gateway,
        locks.clone(),
        cfg.reconciliation.tracker(),
    ));
    let engine = Arc::new(ReconciliationEngine::new(
        intents,
        wallet.clone(),
        tracker.clone(),
        WebhookVerifier::new(&cfg.webhook.secret),
        locks,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(
        tracker.clone(),
        engine.clone(),
        cfg.reconciliation.worker(),
    );
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let app = api::router(AppState {
        wallet,
        tracker,
        engine,
        admin_token: cfg.admin.token.clone(),
    });

    let addr = cfg.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, waiting for reconciliation worker");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Reconciliation worker panicked");
    }

    info!("Credit wallet service stopped");
    Ok(())
}

type Stores = (Arc<dyn LedgerRepository>, Arc<dyn IntentRepository>);

#[cfg(feature = "database")]
async fn open_stores(cfg: &AppConfig) -> anyhow::Result<Stores> {
    use credit_wallet::database::PgStore;

    if let Some(url) = cfg.database.url.as_deref() {
        let store = Arc::new(PgStore::connect(url, cfg.database.max_connections).await?);
        info!("Connected to Postgres, migrations applied");
        let ledger: Arc<dyn LedgerRepository> = store.clone();
        let intents: Arc<dyn IntentRepository> = store;
        return Ok((ledger, intents));
    }
    Ok(in_memory_stores())
}

#[cfg(not(feature = "database"))]
async fn open_stores(cfg: &AppConfig) -> anyhow::Result<Stores> {
    if cfg.database.url.is_some() {
        warn!("database.url is set but this build has no Postgres support");
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> Stores {
    warn!("No database configured, using in-memory stores; balances will not survive a restart");
    (
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryIntentRepository::new()),
    )
}

fn build_gateway(cfg: &AppConfig) -> Arc<dyn PaymentGateway> {
    let Some(primary_url) = cfg.gateway.primary_url.as_deref() else {
        warn!("No gateway configured, using the in-process mock gateway");
        return Arc::new(MockGateway::new("mock"));
    };

    let timeout = cfg.gateway.timeout();
    let primary: Arc<dyn PaymentGateway> = Arc::new(HttpGateway::new("primary", primary_url, timeout));
    let secondary = cfg.gateway.secondary_url.as_deref().map(|url| {
        Arc::new(HttpGateway::new("secondary", url, timeout)) as Arc<dyn PaymentGateway>
    });
    info!(
        primary = %primary_url,
        failover = secondary.is_some(),
        "Payment gateway configured"
    );

    Arc::new(FailoverGateway::new(
        primary,
        secondary,
        cfg.gateway.retry_policy(),
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
