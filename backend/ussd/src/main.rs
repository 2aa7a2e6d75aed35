//! PIFP USSD Gateway — entry point.
//!
//! Serves the telecom gateway's USSD callback, driving feature-phone
//! donation sessions through an in-memory session store. Confirmed
//! donations are recorded in SQLite, pushed to the donation ledger and
//! acknowledged by SMS in the background. A small read-only REST API
//! exposes the catalog and recorded pledges.

mod api;
mod catalog;
mod config;
mod db;
mod errors;
mod input;
mod ledger;
mod locale;
mod machine;
mod pledges;
mod receipts;
mod roundup;
mod screen;
mod session;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use catalog::Catalog;
use config::Config;
use ledger::{DonationLedger, RpcLedger, Settlement};
use locale::LocaleTable;
use machine::UssdService;
use pledges::{PledgeLog, SqlitePledgeLog};
use receipts::{LogNotifier, Notifier, ReceiptDispatcher, SmsNotifier};
use session::{InMemorySessionStore, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Pledge log; migrations run on startup.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared by the ledger relay and the SMS gateway.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let catalog = Arc::new(match &config.catalog_path {
        Some(path) => Catalog::load(path)?,
        None => {
            info!("CATALOG_PATH not set, using built-in catalog");
            Catalog::builtin()
        }
    });

    // ─── Collaborators ────────────────────────────────────
    let ledger: Option<Arc<dyn DonationLedger>> = match &config.ledger_rpc_url {
        Some(url) => Some(Arc::new(RpcLedger::new(client.clone(), url.clone()))),
        None => {
            warn!("LEDGER_RPC_URL not set, pledges will be recorded as unsubmitted");
            None
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.sms {
        Some(sms) => Arc::new(SmsNotifier::new(client.clone(), sms.clone())),
        None => {
            warn!("SMS gateway not configured, receipts will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let pledge_log: Arc<dyn PledgeLog> = Arc::new(SqlitePledgeLog::new(pool.clone()));

    // ─── Sessions ─────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    tokio::spawn(session::run_sweeper(
        sessions.clone(),
        config.session_sweep_interval(),
        config.session_ttl(),
        shutdown.child_token(),
    ));

    let ussd = Arc::new(UssdService::new(
        sessions,
        catalog.clone(),
        LocaleTable::new(config.default_locale),
        config.policy.clone(),
        ReceiptDispatcher::new(notifier, config.receipt_timeout()),
        Settlement::new(ledger, pledge_log.clone(), config.ledger_timeout()),
        pledge_log,
    ));

    // ─── HTTP ─────────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        pool,
        catalog,
        ussd,
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/ussd", post(api::ussd_callback))
        .route("/projects", get(api::get_projects))
        .route("/projects/:id/donations", get(api::get_project_pledges))
        .route("/donations", get(api::get_recent_pledges))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!(
        "USSD gateway listening on http://{addr} (locale {}, amounts {}-{} {})",
        config.default_locale.code(),
        config.policy.min_amount,
        config.policy.max_amount,
        config.policy.currency
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("USSD gateway stopped");
    Ok(())
}

/// Resolve on Ctrl-C and cancel background tasks.
async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    token.cancel();
}
