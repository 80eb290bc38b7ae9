use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use wallet_ledger_service::config::Config;
use wallet_ledger_service::http::{self, AppState};
use wallet_ledger_service::ledger::LedgerStore;
use wallet_ledger_service::lookup::{SourceLookup, UserLookup};
use wallet_ledger_service::service::TransactionService;
use wallet_ledger_service::sweep::CancelSweep;
use wallet_ledger_service::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    info!("starting wallet ledger service");

    let config = Config::from_env();

    let pool = db::create_pool(&config.postgres).await?;
    db::run_migrations(&pool).await?;

    let ledger = LedgerStore::new(pool.clone());
    let user_lookup = UserLookup::new(pool.clone());
    let source_lookup = SourceLookup::new(pool.clone());
    let service = TransactionService::new(ledger.clone(), user_lookup.clone(), source_lookup);

    let app_state = AppState {
        ledger: ledger.clone(),
        service,
        user_lookup,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweep = CancelSweep::new(ledger, config.process.interval_minutes);
    let sweep_rx = shutdown_rx.clone();
    let sweep_handle = tokio::spawn(async move {
        sweep.run(sweep_rx).await;
    });

    let app = http::router(app_state).layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "http server listening");

    let mut http_shutdown_rx = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        http_shutdown_rx.changed().await.ok();
    });
    let server_handle = tokio::spawn(server);

    shutdown_signal().await;
    info!("shutdown signal received, stopping http listener and background tasks");
    shutdown_tx.send(true).ok();

    // In-flight requests get a bounded grace period to finish; a hung
    // connection past that point is aborted rather than blocking exit.
    match tokio::time::timeout(Duration::from_secs(30), server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => error!(error = %err, "http server error"),
        Ok(Err(err)) => error!(error = %err, "http server task panicked"),
        Err(_) => warn!("http server did not drain in-flight requests within 30s, aborting"),
    }

    sweep_handle.await.ok();

    info!("wallet ledger service stopped");
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wallet_ledger_service=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
