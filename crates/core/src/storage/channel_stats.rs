use crate::domain::comparison::{ChannelComparisonRow, ComparisonView};
use crate::domain::stats::ChannelStatsSnapshot;
use crate::ingest::types::RawChannelStats;
use crate::storage::metadata::decode_metadata;
use crate::storage::StoreContext;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeSet;

/// Derives and appends one snapshot from a fetched statistics object. A `None` input is a no-op.
pub async fn record_channel_snapshot(
    pool: &SqlitePool,
    raw: Option<&RawChannelStats>,
    fetched_at: DateTime<Utc>,
) -> anyhow::Result<Option<ChannelStatsSnapshot>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    anyhow::ensure!(!raw.id.trim().is_empty(), "channel id must be non-empty");

    let snapshot = ChannelStatsSnapshot::derive(raw, fetched_at);

    sqlx::query(
        "INSERT INTO channel_stats \
           (channel_id, title, subscriber_count, video_count, view_count, published_at, \
            avg_views_per_video, subscriber_view_ratio, channel_age_days, videos_per_month, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&snapshot.channel_id)
    .bind(&snapshot.title)
    .bind(snapshot.subscriber_count)
    .bind(snapshot.video_count)
    .bind(snapshot.view_count)
    .bind(snapshot.published_at)
    .bind(snapshot.avg_views_per_video)
    .bind(snapshot.subscriber_view_ratio)
    .bind(snapshot.channel_age_days)
    .bind(snapshot.videos_per_month)
    .bind(snapshot.fetched_at)
    .execute(pool)
    .await
    .with_store_context(|| format!("insert channel_stats failed for {}", snapshot.channel_id))?;

    tracing::debug!(
        channel_id = %snapshot.channel_id,
        subscribers = snapshot.subscriber_count,
        videos = snapshot.video_count,
        "recorded channel snapshot"
    );

    Ok(Some(snapshot))
}

/// Latest snapshot per requested channel, left-joined with its metadata.
///
/// Channels with no snapshot produce no row.
pub async fn latest_channel_snapshots_joined<I, S>(
    pool: &SqlitePool,
    channel_ids: I,
) -> anyhow::Result<ComparisonView>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let ids = normalize_ids(channel_ids);
    if ids.is_empty() {
        return Ok(ComparisonView::default());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT cs.channel_id, cs.title, cs.subscriber_count, cs.video_count, cs.view_count, \
                cs.published_at, cs.avg_views_per_video, cs.subscriber_view_ratio, \
                cs.channel_age_days, cs.videos_per_month, cs.fetched_at, \
                cm.channel_id AS meta_channel_id, cm.title AS meta_title, \
                cm.description AS meta_description, cm.firm_type, cm.target_audience, \
                cm.content_type, cm.has_legacy_media, cm.last_updated \
         FROM ( \
             SELECT *, ROW_NUMBER() OVER ( \
                 PARTITION BY channel_id ORDER BY fetched_at DESC, id DESC \
             ) AS rn \
             FROM channel_stats \
             WHERE channel_id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(
        ")) cs \
         LEFT JOIN channel_metadata cm ON cm.channel_id = cs.channel_id \
         WHERE cs.rn = 1 \
         ORDER BY cs.channel_id ASC",
    );

    let rows = qb
        .build_query_as::<JoinedRow>()
        .fetch_all(pool)
        .await
        .store_context("select latest channel snapshots failed")?;

    let rows = rows
        .into_iter()
        .map(JoinedRow::into_comparison_row)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(ComparisonView { rows })
}

/// Deletes every snapshot for the given channels. Metadata rows are kept so a re-added channel
/// gets its curated attributes back.
pub async fn remove_channels<I, S>(pool: &SqlitePool, channel_ids: I) -> anyhow::Result<u64>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let ids = normalize_ids(channel_ids);
    if ids.is_empty() {
        return Ok(0);
    }

    let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM channel_stats WHERE channel_id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let res = qb
        .build()
        .execute(pool)
        .await
        .store_context("delete channel_stats failed")?;
    Ok(res.rows_affected())
}

pub async fn has_snapshot(pool: &SqlitePool, channel_id: &str) -> anyhow::Result<bool> {
    let found: i64 = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM channel_stats WHERE channel_id = ?)",
    )
    .bind(channel_id.trim())
    .fetch_one(pool)
    .await
    .store_context("select channel_stats existence failed")?;
    Ok(found != 0)
}

/// Distinct channel ids that currently have at least one snapshot.
pub async fn snapshot_channel_ids(pool: &SqlitePool) -> anyhow::Result<BTreeSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT channel_id FROM channel_stats")
        .fetch_all(pool)
        .await
        .store_context("select channel ids failed")?;
    Ok(ids.into_iter().collect())
}

/// Most recent snapshots across all channels, newest first.
pub async fn channel_stats_history(
    pool: &SqlitePool,
    limit: i64,
) -> anyhow::Result<Vec<ChannelStatsSnapshot>> {
    let rows = sqlx::query_as::<_, SnapshotRow>(
        "SELECT channel_id, title, subscriber_count, video_count, view_count, published_at, \
                avg_views_per_video, subscriber_view_ratio, channel_age_days, videos_per_month, \
                fetched_at \
         FROM channel_stats \
         ORDER BY fetched_at DESC, id DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .store_context("select channel_stats history failed")?;

    Ok(rows.into_iter().map(SnapshotRow::into_snapshot).collect())
}

fn normalize_ids<I, S>(channel_ids: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    channel_ids
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    channel_id: String,
    title: String,
    subscriber_count: i64,
    video_count: i64,
    view_count: i64,
    published_at: DateTime<Utc>,
    avg_views_per_video: f64,
    subscriber_view_ratio: f64,
    channel_age_days: i64,
    videos_per_month: f64,
    fetched_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            channel_id: self.channel_id,
            title: self.title,
            subscriber_count: self.subscriber_count,
            video_count: self.video_count,
            view_count: self.view_count,
            published_at: self.published_at,
            avg_views_per_video: self.avg_views_per_video,
            subscriber_view_ratio: self.subscriber_view_ratio,
            channel_age_days: self.channel_age_days,
            videos_per_month: self.videos_per_month,
            fetched_at: self.fetched_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JoinedRow {
    #[sqlx(flatten)]
    snapshot: SnapshotRow,
    meta_channel_id: Option<String>,
    meta_title: Option<String>,
    meta_description: Option<String>,
    firm_type: Option<String>,
    target_audience: Option<String>,
    content_type: Option<String>,
    has_legacy_media: Option<bool>,
    last_updated: Option<DateTime<Utc>>,
}

impl JoinedRow {
    fn into_comparison_row(self) -> anyhow::Result<ChannelComparisonRow> {
        let metadata = match self.meta_channel_id {
            Some(channel_id) => Some(decode_metadata(
                channel_id,
                self.meta_title,
                self.meta_description,
                self.firm_type.as_deref(),
                self.target_audience.as_deref().unwrap_or("[]"),
                self.content_type.as_deref(),
                self.has_legacy_media.unwrap_or(false),
                self.last_updated,
            )?),
            None => None,
        };

        Ok(ChannelComparisonRow {
            snapshot: self.snapshot.into_snapshot(),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metadata::{FirmType, MetadataFields};
    use crate::ingest::types::{ChannelSnippet, ChannelStatistics};
    use crate::storage::metadata::upsert_channel_metadata;
    use crate::storage::Store;
    use chrono::TimeZone;

    fn raw(id: &str, subs: i64, videos: i64, views: i64) -> RawChannelStats {
        RawChannelStats {
            id: id.to_string(),
            snippet: ChannelSnippet {
                title: format!("Title {id}"),
                description: None,
                published_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            },
            statistics: ChannelStatistics {
                subscriber_count: subs,
                video_count: videos,
                view_count: views,
            },
        }
    }

    #[tokio::test]
    async fn absent_raw_stats_is_a_silent_noop() {
        let store = Store::open_in_memory().await.unwrap();
        let out = record_channel_snapshot(store.pool(), None, Utc::now()).await.unwrap();
        assert!(out.is_none());
        assert!(channel_stats_history(store.pool(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recorded_snapshot_persists_guarded_ratios() {
        let store = Store::open_in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        record_channel_snapshot(store.pool(), Some(&raw("UC1", 50, 0, 0)), now)
            .await
            .unwrap();
        record_channel_snapshot(store.pool(), Some(&raw("UC2", 50, 10, 5000)), now)
            .await
            .unwrap();

        let view = latest_channel_snapshots_joined(store.pool(), ["UC1", "UC2"])
            .await
            .unwrap();
        let uc1 = &view.get("UC1").unwrap().snapshot;
        assert_eq!(uc1.avg_views_per_video, 0.0);
        assert_eq!(uc1.subscriber_view_ratio, 0.0);
        let uc2 = &view.get("UC2").unwrap().snapshot;
        assert_eq!(uc2.avg_views_per_video, 500.0);
        assert_eq!(uc2.subscriber_view_ratio, 0.01);
    }

    #[tokio::test]
    async fn join_returns_latest_snapshot_with_metadata() {
        let store = Store::open_in_memory().await.unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        record_channel_snapshot(store.pool(), Some(&raw("X", 10, 5, 100)), t1)
            .await
            .unwrap();
        record_channel_snapshot(store.pool(), Some(&raw("X", 20, 6, 200)), t2)
            .await
            .unwrap();
        upsert_channel_metadata(
            store.pool(),
            "X",
            MetadataFields {
                firm_type: Some("podcast".to_string()),
                ..Default::default()
            },
            t2,
        )
        .await
        .unwrap();

        let view = latest_channel_snapshots_joined(store.pool(), ["X"]).await.unwrap();
        assert_eq!(view.len(), 1);
        let row = &view.rows[0];
        assert_eq!(row.snapshot.subscriber_count, 20);
        assert_eq!(row.snapshot.fetched_at, t2);
        assert_eq!(
            row.metadata.as_ref().and_then(|m| m.firm_type),
            Some(FirmType::Podcast)
        );
    }

    #[tokio::test]
    async fn channels_without_snapshots_are_omitted() {
        let store = Store::open_in_memory().await.unwrap();
        record_channel_snapshot(store.pool(), Some(&raw("X", 1, 1, 1)), Utc::now())
            .await
            .unwrap();

        let view = latest_channel_snapshots_joined(store.pool(), ["X", "Y"]).await.unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view.rows[0].snapshot.channel_id, "X");
        assert!(view.rows[0].metadata.is_none());
        assert_eq!(view.missing(["X", "Y"]), vec!["Y".to_string()]);
    }

    #[tokio::test]
    async fn remove_keeps_metadata() {
        let store = Store::open_in_memory().await.unwrap();
        let now = Utc::now();
        record_channel_snapshot(store.pool(), Some(&raw("X", 1, 1, 1)), now)
            .await
            .unwrap();
        record_channel_snapshot(store.pool(), Some(&raw("X", 2, 2, 2)), now)
            .await
            .unwrap();
        upsert_channel_metadata(
            store.pool(),
            "X",
            MetadataFields {
                content_type: Some("both".to_string()),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();

        let removed = remove_channels(store.pool(), ["X"]).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!has_snapshot(store.pool(), "X").await.unwrap());

        record_channel_snapshot(store.pool(), Some(&raw("X", 3, 3, 3)), now)
            .await
            .unwrap();
        let view = latest_channel_snapshots_joined(store.pool(), ["X"]).await.unwrap();
        let metadata = view.rows[0].metadata.as_ref().unwrap();
        assert_eq!(metadata.content_type.map(|c| c.as_str()), Some("both"));
    }

    #[tokio::test]
    async fn empty_requests_touch_nothing() {
        let store = Store::open_in_memory().await.unwrap();
        let none: [&str; 0] = [];
        assert!(latest_channel_snapshots_joined(store.pool(), none).await.unwrap().is_empty());
        assert_eq!(remove_channels(store.pool(), none).await.unwrap(), 0);
    }
}
