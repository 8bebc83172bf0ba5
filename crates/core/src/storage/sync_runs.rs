use crate::domain::sync::{FetchFailure, SyncReport};
use crate::storage::StoreContext;
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

pub async fn record_sync_run(pool: &SqlitePool, report: &SyncReport) -> anyhow::Result<()> {
    let added = serde_json::to_string(&report.added).context("serialize added failed")?;
    let removed = serde_json::to_string(&report.removed).context("serialize removed failed")?;
    let failed = serde_json::to_string(&report.failed).context("serialize failed ids failed")?;

    sqlx::query(
        "INSERT INTO sync_runs (id, provider, started_at, finished_at, added, removed, failed) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(report.run_id.to_string())
    .bind(&report.provider)
    .bind(report.started_at)
    .bind(report.finished_at)
    .bind(added)
    .bind(removed)
    .bind(failed)
    .execute(pool)
    .await
    .store_context("insert sync_runs failed")?;

    Ok(())
}

pub async fn latest_sync_runs(pool: &SqlitePool, limit: i64) -> anyhow::Result<Vec<SyncReport>> {
    let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>, DateTime<Utc>, String, String, String)>(
        "SELECT id, provider, started_at, finished_at, added, removed, failed \
         FROM sync_runs \
         ORDER BY started_at DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .store_context("select sync_runs failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, provider, started_at, finished_at, added, removed, failed) in rows {
        out.push(SyncReport {
            run_id: Uuid::parse_str(&id).with_context(|| format!("invalid sync run id in DB: {id}"))?,
            provider,
            started_at,
            finished_at,
            added: serde_json::from_str::<Vec<String>>(&added)?,
            removed: serde_json::from_str::<Vec<String>>(&removed)?,
            failed: serde_json::from_str::<Vec<FetchFailure>>(&failed)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use chrono::TimeZone;

    #[tokio::test]
    async fn round_trips_a_run() {
        let store = Store::open_in_memory().await.unwrap();
        let report = SyncReport {
            run_id: Uuid::new_v4(),
            provider: "fake".to_string(),
            started_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap(),
            added: vec!["C".to_string()],
            removed: vec!["A".to_string()],
            failed: vec![FetchFailure {
                id: "D".to_string(),
                reason: "no statistics returned".to_string(),
            }],
        };

        record_sync_run(store.pool(), &report).await.unwrap();
        let runs = latest_sync_runs(store.pool(), 5).await.unwrap();
        assert_eq!(runs, vec![report]);
    }
}
