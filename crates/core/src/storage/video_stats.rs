use crate::domain::stats::{VideoMetrics, VideoStatsSnapshot};
use crate::ingest::types::RawVideoStats;
use crate::storage::StoreContext;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Appends one raw video snapshot. Engagement metrics stay empty until
/// [`recompute_video_metrics`] runs. A `None` input is a no-op.
pub async fn record_video_snapshot(
    pool: &SqlitePool,
    raw: Option<&RawVideoStats>,
    fetched_at: DateTime<Utc>,
) -> anyhow::Result<Option<VideoStatsSnapshot>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    anyhow::ensure!(!raw.id.trim().is_empty(), "video id must be non-empty");

    let snapshot = VideoStatsSnapshot::from_raw(raw, fetched_at);

    sqlx::query(
        "INSERT INTO video_stats \
           (video_id, title, channel_id, view_count, like_count, comment_count, published_at, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&snapshot.video_id)
    .bind(&snapshot.title)
    .bind(&snapshot.channel_id)
    .bind(snapshot.view_count)
    .bind(snapshot.like_count)
    .bind(snapshot.comment_count)
    .bind(snapshot.published_at)
    .bind(snapshot.fetched_at)
    .execute(pool)
    .await
    .with_store_context(|| format!("insert video_stats failed for {}", snapshot.video_id))?;

    Ok(Some(snapshot))
}

/// Recomputes engagement metrics for every row of the video table as of `now`.
///
/// Returns the number of rows updated.
pub async fn recompute_video_metrics(pool: &SqlitePool, now: DateTime<Utc>) -> anyhow::Result<u64> {
    let rows = sqlx::query_as::<_, (i64, i64, i64, i64, DateTime<Utc>)>(
        "SELECT id, view_count, like_count, comment_count, published_at FROM video_stats",
    )
    .fetch_all(pool)
    .await
    .store_context("select video_stats for recompute failed")?;

    let mut tx = pool.begin().await.store_context("begin transaction failed")?;
    let mut updated: u64 = 0;

    for (id, views, likes, comments, published_at) in rows {
        let m = VideoMetrics::compute(views, likes, comments, published_at, now);
        let res = sqlx::query(
            "UPDATE video_stats \
             SET like_ratio = ?, comment_ratio = ?, engagement_score = ?, video_age_days = ?, views_per_day = ? \
             WHERE id = ?",
        )
        .bind(m.like_ratio)
        .bind(m.comment_ratio)
        .bind(m.engagement_score)
        .bind(m.video_age_days)
        .bind(m.views_per_day)
        .bind(id)
        .execute(&mut *tx)
        .await
        .store_context("update video_stats metrics failed")?;
        updated += res.rows_affected();
    }

    tx.commit().await.store_context("commit transaction failed")?;
    tracing::info!(updated, "recomputed video engagement metrics");
    Ok(updated)
}

/// Most recent video snapshots, newest first.
pub async fn video_stats(pool: &SqlitePool, limit: i64) -> anyhow::Result<Vec<VideoStatsSnapshot>> {
    let rows = sqlx::query_as::<_, VideoRow>(
        "SELECT video_id, title, channel_id, view_count, like_count, comment_count, published_at, \
                like_ratio, comment_ratio, engagement_score, video_age_days, views_per_day, fetched_at \
         FROM video_stats \
         ORDER BY fetched_at DESC, id DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .store_context("select video_stats failed")?;

    Ok(rows.into_iter().map(VideoRow::into_snapshot).collect())
}

#[derive(Debug, sqlx::FromRow)]
struct VideoRow {
    video_id: String,
    title: String,
    channel_id: String,
    view_count: i64,
    like_count: i64,
    comment_count: i64,
    published_at: DateTime<Utc>,
    like_ratio: Option<f64>,
    comment_ratio: Option<f64>,
    engagement_score: Option<f64>,
    video_age_days: Option<i64>,
    views_per_day: Option<f64>,
    fetched_at: DateTime<Utc>,
}

impl VideoRow {
    fn into_snapshot(self) -> VideoStatsSnapshot {
        let metrics = match (
            self.like_ratio,
            self.comment_ratio,
            self.engagement_score,
            self.video_age_days,
            self.views_per_day,
        ) {
            (Some(like_ratio), Some(comment_ratio), Some(engagement_score), Some(video_age_days), Some(views_per_day)) => {
                Some(VideoMetrics {
                    like_ratio,
                    comment_ratio,
                    engagement_score,
                    video_age_days,
                    views_per_day,
                })
            }
            _ => None,
        };

        VideoStatsSnapshot {
            video_id: self.video_id,
            title: self.title,
            channel_id: self.channel_id,
            view_count: self.view_count,
            like_count: self.like_count,
            comment_count: self.comment_count,
            published_at: self.published_at,
            metrics,
            fetched_at: self.fetched_at,
        }
    }
}
