//! Axum handlers: the USSD gateway callback and a small read-only REST API.

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::catalog::{Catalog, Project};
use crate::db;
use crate::machine::UssdService;
use crate::pledges::PledgeRecord;
use crate::receipts::mask_phone;
use crate::screen::MenuScreen;

const RECENT_PLEDGES_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub catalog: Arc<Catalog>,
    pub ussd: Arc<UssdService>,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

/// Form body posted by the telecom gateway on every keystroke.
#[derive(Debug, Default, Deserialize)]
pub struct UssdCallback {
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
    #[serde(rename = "phoneNumber", default)]
    pub phone_number: String,
    /// Full keystroke history, `*`-separated; empty on the first turn.
    #[serde(default)]
    pub text: String,
    #[serde(rename = "serviceCode", default)]
    pub service_code: Option<String>,
    #[serde(rename = "networkCode", default)]
    pub network_code: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_sessions: Option<usize>,
}

#[derive(Serialize)]
pub struct ProjectView<'a> {
    #[serde(flatten)]
    pub project: &'a Project,
    pub funding_percent: u64,
}

#[derive(Serialize)]
pub struct ProjectsResponse<'a> {
    pub count: usize,
    pub projects: Vec<ProjectView<'a>>,
}

#[derive(Serialize)]
pub struct PledgesResponse {
    pub count: usize,
    pub pledges: Vec<PledgeRecord>,
}

#[derive(Serialize)]
pub struct ProjectPledgesResponse {
    pub project_id: i64,
    pub count: usize,
    pub pledges: Vec<PledgeRecord>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `POST /ussd`
///
/// Always answers `200 text/plain` with a `CON`/`END` body, even when the
/// form cannot be decoded.
pub async fn ussd_callback(
    State(state): State<Arc<ApiState>>,
    form: Result<Form<UssdCallback>, FormRejection>,
) -> MenuScreen {
    let callback = match form {
        Ok(Form(callback)) => callback,
        Err(rejection) => {
            warn!("Malformed USSD callback: {rejection}");
            UssdCallback::default()
        }
    };
    debug!(
        "USSD callback for session {:?} (service {:?}, network {:?})",
        callback.session_id, callback.service_code, callback.network_code
    );

    state
        .ussd
        .handle_turn(&callback.session_id, &callback.phone_number, &callback.text)
        .await
}

/// `GET /health`
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.ussd.sessions().active().await.ok(),
    })
}

/// `GET /projects`
pub async fn get_projects(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let projects: Vec<ProjectView> = state
        .catalog
        .projects()
        .iter()
        .map(|project| ProjectView {
            project,
            funding_percent: project.funding_percent(),
        })
        .collect();
    let body = serde_json::json!(ProjectsResponse {
        count: projects.len(),
        projects,
    });
    (StatusCode::OK, Json(body))
}

/// `GET /donations`
///
/// Most recent pledges confirmed over USSD, newest first.
pub async fn get_recent_pledges(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match db::get_recent_pledges(&state.pool, RECENT_PLEDGES_LIMIT).await {
        Ok(pledges) => {
            let pledges = masked(pledges);
            (
                StatusCode::OK,
                Json(serde_json::json!(PledgesResponse {
                    count: pledges.len(),
                    pledges,
                })),
            )
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// `GET /projects/:id/donations`
pub async fn get_project_pledges(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<i64>,
) -> impl IntoResponse {
    match db::get_pledges_for_project(&state.pool, project_id).await {
        Ok(pledges) => {
            let pledges = masked(pledges);
            (
                StatusCode::OK,
                Json(serde_json::json!(ProjectPledgesResponse {
                    project_id,
                    count: pledges.len(),
                    pledges,
                })),
            )
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

fn masked(pledges: Vec<PledgeRecord>) -> Vec<PledgeRecord> {
    pledges
        .into_iter()
        .map(|mut p| {
            p.phone = mask_phone(&p.phone);
            p
        })
        .collect()
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!(ErrorResponse {
            error: e.to_string()
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::config::DonationPolicy;
    use crate::ledger::Settlement;
    use crate::locale::{Locale, LocaleTable};
    use crate::receipts::ReceiptDispatcher;
    use crate::session::InMemorySessionStore;
    use crate::testing::{FakeLedger, MemoryPledgeLog, RecordingNotifier};

    fn state() -> Arc<ApiState> {
        let catalog = Arc::new(Catalog::builtin());
        let log = Arc::new(MemoryPledgeLog::default());
        let (notifier, _rx) = RecordingNotifier::new();
        let ussd = UssdService::new(
            Arc::new(InMemorySessionStore::new()),
            catalog.clone(),
            LocaleTable::new(Locale::En),
            DonationPolicy::default(),
            ReceiptDispatcher::new(Arc::new(notifier), Duration::from_secs(1)),
            Settlement::new(
                Some(Arc::new(FakeLedger::succeeding())),
                log.clone(),
                Duration::from_secs(1),
            ),
            log,
        );
        Arc::new(ApiState {
            pool: SqlitePoolOptions::new()
                .connect_lazy("sqlite::memory:")
                .unwrap(),
            catalog,
            ussd: Arc::new(ussd),
        })
    }

    fn callback(session_id: &str, text: &str) -> Result<Form<UssdCallback>, FormRejection> {
        Ok(Form(UssdCallback {
            session_id: session_id.to_string(),
            phone_number: "+254712345678".to_string(),
            text: text.to_string(),
            service_code: Some("*384*123#".to_string()),
            network_code: Some("63902".to_string()),
        }))
    }

    #[tokio::test]
    async fn callback_drives_a_session() {
        let state = state();
        let screen = ussd_callback(State(state.clone()), callback("s-1", "")).await;
        assert!(screen.to_wire().starts_with("CON Welcome to PIFP"));

        let screen = ussd_callback(State(state.clone()), callback("s-1", "1")).await;
        assert!(screen.to_wire().starts_with("CON Select a project:"));
        assert_eq!(state.ussd.sessions().active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn callback_without_session_id_ends() {
        let state = state();
        let screen = ussd_callback(State(state.clone()), callback("", "")).await;
        assert!(screen.to_wire().starts_with("END "));
        assert_eq!(state.ussd.sessions().active().await.unwrap(), 0);
    }

    #[test]
    fn callback_form_field_names() {
        let parsed: UssdCallback = serde_json::from_value(serde_json::json!({
            "sessionId": "ATUid_1",
            "phoneNumber": "+254712345678",
            "text": "1*2",
            "serviceCode": "*384*123#",
        }))
        .unwrap();
        assert_eq!(parsed.session_id, "ATUid_1");
        assert_eq!(parsed.text, "1*2");
        assert!(parsed.network_code.is_none());

        let empty: UssdCallback = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.text.is_empty());
    }

    #[tokio::test]
    async fn projects_include_funding_percent() {
        let state = state();
        let response = get_projects(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn project_view_serializes_flat() {
        let catalog = Catalog::builtin();
        let project = catalog.get(0).unwrap();
        let value = serde_json::to_value(ProjectView {
            project,
            funding_percent: project.funding_percent(),
        })
        .unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["funding_percent"], 63);
        assert_eq!(value["name"]["en"], "Clean Water Well");
    }
}
