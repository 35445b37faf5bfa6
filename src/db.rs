use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::RawRow;
use crate::source;

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Stable key for a CSV row so re-importing the same file inserts nothing new.
pub fn source_key(csv_path: &Path, index: usize) -> String {
    let stem = csv_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "import".to_string());
    format!("{stem}-{index}")
}

/// Copies raw CSV rows into the staging table without validating them; the
/// record store applies the same ingestion rules whichever source is used.
pub async fn import_csv(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let rows = source::read_csv(csv_path)?;
    let mut inserted = 0usize;

    for (index, row) in rows.iter().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(reason) => {
                warn!(row = index, %reason, "not staging unreadable CSV row");
                continue;
            }
        };
        let result = sqlx::query(
            r#"
            INSERT INTO churn_analytics.customer_rows
            (id, source_key, state, account_length, international_plan, voice_mail_plan,
             customer_service_calls, total_charge, churn, churn_risk_score, risk_category)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_key(csv_path, index))
        .bind(&row.state)
        .bind(&row.account_length)
        .bind(&row.international_plan)
        .bind(&row.voice_mail_plan)
        .bind(&row.customer_service_calls)
        .bind(&row.total_charge)
        .bind(&row.churn)
        .bind(&row.churn_risk_score)
        .bind(&row.risk_category)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    info!(inserted, total = rows.len(), path = %csv_path.display(), "imported customer rows");
    Ok(inserted)
}

/// Staged rows in import order, optionally limited to one state.
pub async fn fetch_rows(pool: &PgPool, state: Option<&str>) -> anyhow::Result<Vec<RawRow>> {
    let mut query = String::from(
        "SELECT state, account_length, international_plan, voice_mail_plan, \
         customer_service_calls, total_charge, churn, churn_risk_score, risk_category \
         FROM churn_analytics.customer_rows",
    );

    if state.is_some() {
        query.push_str(" WHERE state = $1");
    }
    query.push_str(" ORDER BY row_seq");

    let mut rows = sqlx::query(&query);

    if let Some(value) = state {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut raw_rows = Vec::with_capacity(records.len());

    for row in records {
        raw_rows.push(RawRow {
            state: row.get("state"),
            account_length: row.get("account_length"),
            international_plan: row.get("international_plan"),
            voice_mail_plan: row.get("voice_mail_plan"),
            customer_service_calls: row.get("customer_service_calls"),
            total_charge: row.get("total_charge"),
            churn: row.get("churn"),
            churn_risk_score: row.get("churn_risk_score"),
            risk_category: row.get("risk_category"),
        });
    }

    Ok(raw_rows)
}

pub async fn last_import(pool: &PgPool) -> anyhow::Result<Option<DateTime<Utc>>> {
    let latest: Option<DateTime<Utc>> =
        sqlx::query("SELECT MAX(imported_at) AS latest FROM churn_analytics.customer_rows")
            .fetch_one(pool)
            .await?
            .get("latest");
    Ok(latest)
}
