//! In-memory collaborators shared by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio::sync::mpsc;

use crate::errors::{GatewayError, Result};
use crate::ledger::DonationLedger;
use crate::pledges::{ImpactSummary, Pledge, PledgeLog, PledgeStatus};
use crate::receipts::{Delivery, Notifier};

enum LedgerMode {
    Succeed,
    Fail,
    Hang,
}

pub struct FakeLedger {
    mode: LedgerMode,
}

impl FakeLedger {
    pub fn succeeding() -> Self {
        Self {
            mode: LedgerMode::Succeed,
        }
    }

    pub fn failing() -> Self {
        Self {
            mode: LedgerMode::Fail,
        }
    }

    pub fn hanging() -> Self {
        Self {
            mode: LedgerMode::Hang,
        }
    }
}

#[async_trait]
impl DonationLedger for FakeLedger {
    async fn donate(&self, _project_id: u64, _amount: u64, reference: &str) -> Result<String> {
        match self.mode {
            LedgerMode::Succeed => Ok(format!("tx-{reference}")),
            LedgerMode::Fail => Err(GatewayError::Ledger("donation rejected".to_string())),
            LedgerMode::Hang => std::future::pending().await,
        }
    }
}

type Entry = (Pledge, PledgeStatus, Option<String>);

#[derive(Default)]
pub struct MemoryPledgeLog {
    entries: Mutex<Vec<Entry>>,
    fail_reads: bool,
}

impl MemoryPledgeLog {
    pub fn failing_reads() -> Self {
        Self {
            entries: Mutex::default(),
            fail_reads: true,
        }
    }

    pub fn entry(&self, reference: &str) -> Option<Entry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _, _)| p.reference == reference)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl PledgeLog for MemoryPledgeLog {
    async fn record(&self, pledge: &Pledge) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push((pledge.clone(), PledgeStatus::Pending, None));
        Ok(())
    }

    async fn set_status(
        &self,
        reference: &str,
        status: PledgeStatus,
        tx_ref: Option<&str>,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|(p, _, _)| p.reference == reference) {
            entry.1 = status;
            if let Some(tx_ref) = tx_ref {
                entry.2 = Some(tx_ref.to_string());
            }
        }
        Ok(())
    }

    async fn impact_for(&self, phone: &str) -> Result<ImpactSummary> {
        if self.fail_reads {
            return Err(GatewayError::Database(sqlx::Error::PoolTimedOut));
        }
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(p, status, _)| p.phone == phone && *status != PledgeStatus::Failed)
            .fold(ImpactSummary::default(), |acc, (p, _, _)| ImpactSummary {
                count: acc.count + 1,
                total: acc.total + p.amount,
            }))
    }
}

/// Forwards every `(phone, message)` it is asked to send to a channel.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<(String, String)>,
    hang: bool,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, hang: false }, rx)
    }

    pub fn hanging() -> (Self, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, hang: true }, rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_receipt(&self, phone_number: &str, message: &str) -> Delivery {
        let _ = self
            .tx
            .send((phone_number.to_string(), message.to_string()));
        if self.hang {
            std::future::pending::<()>().await;
        }
        Delivery::Delivered
    }
}

/// A request seen by [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub api_key: Option<String>,
    pub body: String,
}

struct StubState {
    replies: Mutex<VecDeque<(StatusCode, &'static str)>>,
    requests: Mutex<Vec<StubRequest>>,
}

/// Local HTTP server answering `POST /` with canned replies in order. The
/// last reply repeats once the others are used up.
pub struct StubServer {
    pub url: String,
    state: Arc<StubState>,
}

impl StubServer {
    pub async fn start(replies: Vec<(StatusCode, &'static str)>) -> Self {
        let state = Arc::new(StubState {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        });
        let app = Router::new()
            .route("/", post(stub_reply))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Self {
            url: format!("http://{addr}/"),
            state,
        }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn stub_reply(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    state.requests.lock().unwrap().push(StubRequest {
        api_key: headers
            .get("apikey")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    let (status, body) = {
        let mut replies = state.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().copied().unwrap_or((StatusCode::OK, ""))
        }
    };
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
