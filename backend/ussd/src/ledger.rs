//! Donation ledger client and background settlement of confirmed pledges.
//!
//! ## Resilience
//!
//! * The JSON-RPC relay is retried with exponential back-off on transport
//!   errors, rate limits, 5xx responses and soft RPC errors, up to
//!   [`MAX_BACKOFF_SECS`].
//! * The whole submission is bounded by the settlement timeout; nothing from
//!   this module ever reaches a USSD screen.
//! * Without a relay, pledges are recorded as `unsubmitted` and never fail.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{GatewayError, Result};
use crate::pledges::{Pledge, PledgeLog, PledgeStatus};

const MAX_BACKOFF_SECS: u64 = 8;
const INITIAL_BACKOFF_SECS: u64 = 1;

/// The donation contract as seen from the gateway.
#[async_trait]
pub trait DonationLedger: Send + Sync {
    /// Submit a donation and return the ledger's transaction reference.
    async fn donate(&self, project_id: u64, amount: u64, reference: &str) -> Result<String>;
}

// ─────────────────────────────────────────────────────────
// JSON-RPC relay
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<DonateResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DonateResult {
    #[serde(rename = "txHash")]
    tx_hash: String,
}

/// Talks to a JSON-RPC relay that signs and submits `donate` calls.
pub struct RpcLedger {
    client: Client,
    rpc_url: String,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RpcLedger {
    pub fn new(client: Client, rpc_url: impl Into<String>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
        }
    }

    #[cfg(test)]
    fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

#[async_trait]
impl DonationLedger for RpcLedger {
    async fn donate(&self, project_id: u64, amount: u64, reference: &str) -> Result<String> {
        let mut backoff = self.initial_backoff;

        loop {
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "donate",
                    "params": {
                        "projectId": project_id,
                        "amount": amount,
                        "reference": reference,
                    },
                }))
                .send()
                .await;

            match response {
                Err(e) => {
                    warn!("Ledger request failed (will retry in {backoff:?}): {e}");
                }
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    warn!("Rate-limited by ledger relay (will retry in {backoff:?})");
                }
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(
                        "Ledger relay returned {} (will retry in {backoff:?})",
                        resp.status()
                    );
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(GatewayError::Ledger(format!(
                        "ledger relay returned {}",
                        resp.status()
                    )));
                }
                Ok(resp) => {
                    let body: RpcResponse = resp.json().await?;
                    match parse_donate_response(body) {
                        Ok(tx_hash) => return Ok(tx_hash),
                        Err(RpcOutcome::Hard(e)) => return Err(e),
                        Err(RpcOutcome::Soft(message)) => {
                            warn!("Ledger soft error (will retry in {backoff:?}): {message}");
                        }
                    }
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

enum RpcOutcome {
    Hard(GatewayError),
    Soft(String),
}

fn parse_donate_response(body: RpcResponse) -> std::result::Result<String, RpcOutcome> {
    if let Some(err) = body.error {
        // Invalid request / unknown method / invalid params will not heal on retry.
        if matches!(err.code, -32600 | -32601 | -32602) {
            return Err(RpcOutcome::Hard(GatewayError::Ledger(format!(
                "RPC hard error {}: {}",
                err.code, err.message
            ))));
        }
        return Err(RpcOutcome::Soft(format!("{} {}", err.code, err.message)));
    }
    body.result
        .map(|r| r.tx_hash)
        .ok_or_else(|| RpcOutcome::Hard(GatewayError::Ledger("Empty result from donate".into())))
}

// ─────────────────────────────────────────────────────────
// Settlement
// ─────────────────────────────────────────────────────────

/// Records confirmed pledges and pushes them to the ledger off the
/// request path. With no ledger configured the pledge is only recorded.
#[derive(Clone)]
pub struct Settlement {
    ledger: Option<Arc<dyn DonationLedger>>,
    log: Arc<dyn PledgeLog>,
    timeout: Duration,
}

impl Settlement {
    pub fn new(
        ledger: Option<Arc<dyn DonationLedger>>,
        log: Arc<dyn PledgeLog>,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            log,
            timeout,
        }
    }

    /// Spawn settlement of `pledge`; the caller does not wait for it.
    pub fn submit(&self, pledge: Pledge) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.settle(pledge).await })
    }

    async fn settle(&self, pledge: Pledge) {
        if let Err(e) = self.log.record(&pledge).await {
            error!("Failed to record pledge {}: {e}", pledge.reference);
        }

        let Some(ledger) = &self.ledger else {
            info!("Pledge {} kept unsubmitted: no ledger relay", pledge.reference);
            self.mark(&pledge, PledgeStatus::Unsubmitted, None).await;
            return;
        };

        let outcome = tokio::time::timeout(
            self.timeout,
            ledger.donate(pledge.project_id, pledge.amount, &pledge.reference),
        )
        .await;

        let (status, tx_ref) = match outcome {
            Ok(Ok(tx_ref)) => {
                info!(
                    "Pledge {} submitted to ledger (project {}, tx {tx_ref})",
                    pledge.reference, pledge.project_id
                );
                (PledgeStatus::Submitted, Some(tx_ref))
            }
            Ok(Err(e)) => {
                warn!("Pledge {} not submitted: {e}", pledge.reference);
                (PledgeStatus::Failed, None)
            }
            Err(_) => {
                warn!(
                    "Pledge {} not submitted: ledger timed out after {:?}",
                    pledge.reference, self.timeout
                );
                (PledgeStatus::Failed, None)
            }
        };

        self.mark(&pledge, status, tx_ref.as_deref()).await;
    }

    async fn mark(&self, pledge: &Pledge, status: PledgeStatus, tx_ref: Option<&str>) {
        match self.log.set_status(&pledge.reference, status, tx_ref).await {
            Ok(()) => debug!("Pledge {} marked {}", pledge.reference, status.as_str()),
            Err(e) => error!("Failed to update pledge {}: {e}", pledge.reference),
        }
    }
}
