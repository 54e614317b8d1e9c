use std::collections::BTreeMap;

use chrono::NaiveDate;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::chain::ChainReport;
use crate::models::DailyRecord;
use crate::store::DailyRecordStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Inserts new days and merges fields into existing ones. Returns the number
/// of days whose stored fields changed.
pub async fn upsert_records(pool: &PgPool, records: &[DailyRecord]) -> anyhow::Result<usize> {
    let mut changed = 0usize;

    for record in records {
        let result = sqlx::query(
            r#"
            INSERT INTO bulletin.daily_records (date, fields)
            VALUES ($1, $2)
            ON CONFLICT (date) DO UPDATE
            SET fields = bulletin.daily_records.fields || EXCLUDED.fields,
                updated_at = now()
            WHERE bulletin.daily_records.fields IS DISTINCT FROM
                  bulletin.daily_records.fields || EXCLUDED.fields
            "#,
        )
        .bind(record.date)
        .bind(Json(&record.fields))
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            changed += 1;
        }
    }

    Ok(changed)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let store = DailyRecordStore::load_csv(csv_path)?;
    upsert_records(pool, store.records()).await
}

pub async fn fetch_records(pool: &PgPool) -> anyhow::Result<DailyRecordStore> {
    let rows = sqlx::query("SELECT date, fields FROM bulletin.daily_records ORDER BY date")
        .fetch_all(pool)
        .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let Json(fields): Json<BTreeMap<String, f64>> = row.try_get("fields")?;
        records.push(DailyRecord {
            date: row.try_get("date")?,
            fields,
        });
    }

    Ok(DailyRecordStore::new(records)?)
}

pub async fn already_posted(
    pool: &PgPool,
    metric: &str,
    data_date: NaiveDate,
) -> anyhow::Result<bool> {
    let row = sqlx::query(
        "SELECT EXISTS (SELECT 1 FROM bulletin.post_runs WHERE metric = $1 AND data_date = $2) AS posted",
    )
    .bind(metric)
    .bind(data_date)
    .fetch_one(pool)
    .await?;

    Ok(row.get("posted"))
}

pub async fn record_run(pool: &PgPool, report: &ChainReport) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bulletin.post_runs
        (id, metric, data_date, posts, failures, first_post_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (metric, data_date) DO UPDATE
        SET id = EXCLUDED.id,
            posts = EXCLUDED.posts,
            failures = EXCLUDED.failures,
            first_post_id = EXCLUDED.first_post_id,
            finished_at = now()
        "#,
    )
    .bind(report.run_id)
    .bind(&report.metric)
    .bind(report.data_date)
    .bind(report.posts.len() as i32)
    .bind(report.failures as i32)
    .bind(report.posts.first().map(|post| post.post_id.clone()))
    .execute(pool)
    .await?;

    Ok(())
}
