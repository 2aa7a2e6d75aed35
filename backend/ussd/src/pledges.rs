//! Donations confirmed over USSD and the log that tracks their settlement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db;
use crate::errors::Result;

/// Settlement progress of a pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PledgeStatus {
    /// Recorded, not yet acknowledged by the ledger.
    Pending,
    /// The ledger accepted the donation and returned a transaction reference.
    Submitted,
    /// No ledger relay is configured; the pledge is kept for later submission.
    Unsubmitted,
    /// The ledger rejected the donation or could not be reached in time.
    Failed,
}

impl PledgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Unsubmitted => "unsubmitted",
            Self::Failed => "failed",
        }
    }
}

/// A donation the caller confirmed on the USSD menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pledge {
    /// Opaque reference shown on the success screen and in the receipt.
    pub reference: String,
    pub session_id: String,
    pub phone: String,
    pub project_id: u64,
    pub amount: u64,
    pub currency: String,
}

/// A pledge as stored in / read from the database.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PledgeRecord {
    pub id: i64,
    pub reference: String,
    pub session_id: String,
    pub phone: String,
    pub project_id: i64,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub tx_ref: Option<String>,
    pub created_at: i64,
}

/// What a caller has given so far. Failed pledges are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImpactSummary {
    pub count: u64,
    pub total: u64,
}

#[async_trait]
pub trait PledgeLog: Send + Sync {
    async fn record(&self, pledge: &Pledge) -> Result<()>;
    async fn set_status(
        &self,
        reference: &str,
        status: PledgeStatus,
        tx_ref: Option<&str>,
    ) -> Result<()>;
    async fn impact_for(&self, phone: &str) -> Result<ImpactSummary>;
}

/// [`PledgeLog`] backed by the service's SQLite database.
#[derive(Clone)]
pub struct SqlitePledgeLog {
    pool: SqlitePool,
}

impl SqlitePledgeLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PledgeLog for SqlitePledgeLog {
    async fn record(&self, pledge: &Pledge) -> Result<()> {
        db::insert_pledge(&self.pool, pledge).await
    }

    async fn set_status(
        &self,
        reference: &str,
        status: PledgeStatus,
        tx_ref: Option<&str>,
    ) -> Result<()> {
        db::update_pledge_status(&self.pool, reference, status, tx_ref).await
    }

    async fn impact_for(&self, phone: &str) -> Result<ImpactSummary> {
        db::impact_for_phone(&self.pool, phone).await
    }
}
