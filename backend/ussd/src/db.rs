//! Database layer — migrations and pledge queries.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::Result;
use crate::pledges::{ImpactSummary, Pledge, PledgeRecord, PledgeStatus};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Create the database file on first start.
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Pledge writes
// ─────────────────────────────────────────────────────────

/// Persist a newly confirmed pledge as `pending`. A reference that is
/// already stored is ignored so a replayed settlement stays idempotent.
pub async fn insert_pledge(pool: &SqlitePool, pledge: &Pledge) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO pledges
            (reference, session_id, phone, project_id, amount, currency, status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&pledge.reference)
    .bind(&pledge.session_id)
    .bind(&pledge.phone)
    .bind(pledge.project_id as i64)
    .bind(pledge.amount as i64)
    .bind(&pledge.currency)
    .bind(PledgeStatus::Pending.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_pledge_status(
    pool: &SqlitePool,
    reference: &str,
    status: PledgeStatus,
    tx_ref: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE pledges SET status = ?1, tx_ref = COALESCE(?2, tx_ref) WHERE reference = ?3")
        .bind(status.as_str())
        .bind(tx_ref)
        .bind(reference)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Pledge reads
// ─────────────────────────────────────────────────────────

/// Count and total of a caller's pledges, excluding failed ones.
pub async fn impact_for_phone(pool: &SqlitePool, phone: &str) -> Result<ImpactSummary> {
    let (count, total): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(amount), 0)
        FROM   pledges
        WHERE  phone = ?1 AND status != ?2
        "#,
    )
    .bind(phone)
    .bind(PledgeStatus::Failed.as_str())
    .fetch_one(pool)
    .await?;

    Ok(ImpactSummary {
        count: count.max(0) as u64,
        total: total.max(0) as u64,
    })
}

/// Most recent pledges, newest first.
pub async fn get_recent_pledges(pool: &SqlitePool, limit: i64) -> Result<Vec<PledgeRecord>> {
    let rows = sqlx::query_as::<_, PledgeRecord>(
        r#"
        SELECT id, reference, session_id, phone, project_id, amount, currency,
               status, tx_ref, created_at
        FROM   pledges
        ORDER  BY id DESC
        LIMIT  ?1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Pledges for one project, oldest first.
pub async fn get_pledges_for_project(
    pool: &SqlitePool,
    project_id: i64,
) -> Result<Vec<PledgeRecord>> {
    let rows = sqlx::query_as::<_, PledgeRecord>(
        r#"
        SELECT id, reference, session_id, phone, project_id, amount, currency,
               status, tx_ref, created_at
        FROM   pledges
        WHERE  project_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
