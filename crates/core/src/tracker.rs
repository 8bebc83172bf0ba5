//! Tracked channel set and the facade that keeps the store in step with it.

use crate::config::Settings;
use crate::domain::comparison::ComparisonView;
use crate::domain::metadata::ChannelMetadata;
use crate::domain::sync::{FetchFailure, SyncReport};
use crate::error::ChanbenchError;
use crate::ingest::provider::ChannelStatsProvider;
use crate::ingest::types::{RawChannelStats, RawVideoStats};
use crate::storage::{channel_stats, metadata, sync_runs, video_stats, Store};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Channel ids currently under comparison. Owned by the caller and passed into the facade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackedChannelSet {
    ids: BTreeSet<String>,
}

impl TrackedChannelSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Accepts ids separated by newlines or commas.
    pub fn parse(input: &str) -> Self {
        Self::new(input.split(|c| c == '\n' || c == ','))
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.ids.contains(channel_id.trim())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.ids.iter().map(String::as_str)
    }

    pub fn list(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn with_added<I, S>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = self.clone();
        out.ids.extend(Self::new(ids).ids);
        out
    }

    pub fn with_removed<I, S>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed = Self::new(ids);
        Self {
            ids: self.ids.difference(&removed.ids).cloned().collect(),
        }
    }

    /// `(desired - current, current - desired)`.
    pub fn diff(&self, desired: &TrackedChannelSet) -> (Vec<String>, Vec<String>) {
        let to_add = desired.ids.difference(&self.ids).cloned().collect();
        let to_remove = self.ids.difference(&desired.ids).cloned().collect();
        (to_add, to_remove)
    }
}

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Pause between consecutive provider fetches.
    pub fetch_delay: Duration,
    /// Upper bound for one provider fetch; expiry counts as a provider failure.
    pub fetch_timeout: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            fetch_delay: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl TrackerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            fetch_delay: settings.fetch_delay(),
            fetch_timeout: settings.provider_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoFetchReport {
    pub recorded: Vec<String>,
    pub failed: Vec<FetchFailure>,
}

/// Joins statistics with metadata and keeps stored snapshots in step with a tracked set.
///
/// Requests must be serialized through one instance; the store it owns is single-writer.
pub struct ChannelTracker {
    store: Store,
    provider: Arc<dyn ChannelStatsProvider>,
    opts: TrackerOptions,
}

impl ChannelTracker {
    pub fn new(store: Store, provider: Arc<dyn ChannelStatsProvider>, opts: TrackerOptions) -> Self {
        Self {
            store,
            provider,
            opts,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Moves the store from `tracked` to `desired`: snapshots of dropped channels are removed
    /// first, then each new channel is fetched and recorded along with a metadata stub.
    ///
    /// Fetch failures are collected in the report and do not stop the batch. Store errors abort.
    /// On return `tracked` equals `desired`; channels that failed to fetch stay tracked but have
    /// no comparison row. A `sync_runs` row is written only when something was added or removed.
    pub async fn update_tracked_set(
        &self,
        tracked: &mut TrackedChannelSet,
        desired: TrackedChannelSet,
    ) -> anyhow::Result<SyncReport> {
        let started_at = Utc::now();
        let (to_add, to_remove) = tracked.diff(&desired);
        let changed = !to_add.is_empty() || !to_remove.is_empty();

        if !to_remove.is_empty() {
            let deleted = channel_stats::remove_channels(self.store.pool(), &to_remove).await?;
            tracing::info!(channels = ?to_remove, deleted, "removed channel snapshots");
        }

        let (added, failed) = self.fetch_and_record(&to_add).await?;
        *tracked = desired;

        let report = SyncReport {
            run_id: uuid::Uuid::new_v4(),
            provider: self.provider.provider_name().to_string(),
            started_at,
            finished_at: Utc::now(),
            added,
            removed: to_remove,
            failed,
        };
        if !changed {
            tracing::debug!(tracked = tracked.len(), "tracked channel set unchanged");
            return Ok(report);
        }
        sync_runs::record_sync_run(self.store.pool(), &report).await?;

        tracing::info!(
            run_id = %report.run_id,
            added = report.added.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            tracked = tracked.len(),
            "tracked channel set updated"
        );
        Ok(report)
    }

    pub async fn add_channels<I, S>(
        &self,
        tracked: &mut TrackedChannelSet,
        ids: I,
    ) -> anyhow::Result<SyncReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let desired = tracked.with_added(ids);
        self.update_tracked_set(tracked, desired).await
    }

    pub async fn remove_channels<I, S>(
        &self,
        tracked: &mut TrackedChannelSet,
        ids: I,
    ) -> anyhow::Result<SyncReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let desired = tracked.with_removed(ids);
        self.update_tracked_set(tracked, desired).await
    }

    /// Fetches tracked channels that have no snapshot yet. Returns the ids that still failed.
    pub async fn ensure_snapshots(
        &self,
        tracked: &TrackedChannelSet,
    ) -> anyhow::Result<Vec<FetchFailure>> {
        let mut missing = Vec::new();
        for id in tracked.iter() {
            if !channel_stats::has_snapshot(self.store.pool(), id).await? {
                missing.push(id.to_string());
            }
        }
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(channels = ?missing, "backfilling channels without snapshots");
        let (_, failed) = self.fetch_and_record(&missing).await?;
        Ok(failed)
    }

    /// Latest snapshot plus metadata for each tracked channel that has one.
    pub async fn comparison(&self, tracked: &TrackedChannelSet) -> anyhow::Result<ComparisonView> {
        let view = channel_stats::latest_channel_snapshots_joined(self.store.pool(), tracked.iter())
            .await?;
        if view.is_empty() && !tracked.is_empty() {
            tracing::warn!(tracked = tracked.len(), "comparison view is empty");
        }
        Ok(view)
    }

    /// Fetches and records raw video snapshots. Engagement metrics are left to the
    /// recomputation pass.
    pub async fn fetch_videos<I, S>(&self, video_ids: I) -> anyhow::Result<VideoFetchReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = TrackedChannelSet::new(video_ids).list();
        let mut report = VideoFetchReport::default();

        for (idx, id) in ids.iter().enumerate() {
            if idx != 0 {
                tokio::time::sleep(self.opts.fetch_delay).await;
            }
            match self.fetch_video(id).await {
                Ok(raw) => {
                    video_stats::record_video_snapshot(self.store.pool(), Some(&raw), Utc::now())
                        .await?;
                    report.recorded.push(id.clone());
                }
                Err(err) => {
                    tracing::warn!(video_id = %id, error = %err, "video fetch failed; skipping");
                    report.failed.push(FetchFailure {
                        id: id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn fetch_and_record(
        &self,
        channel_ids: &[String],
    ) -> anyhow::Result<(Vec<String>, Vec<FetchFailure>)> {
        let mut added = Vec::new();
        let mut failed = Vec::new();
        let total = channel_ids.len();

        for (idx, id) in channel_ids.iter().enumerate() {
            if idx != 0 {
                tokio::time::sleep(self.opts.fetch_delay).await;
            }

            match self.fetch_channel(id).await {
                Ok(raw) => {
                    let now = Utc::now();
                    channel_stats::record_channel_snapshot(self.store.pool(), Some(&raw), now)
                        .await?;
                    let stub = ChannelMetadata::stub(
                        id,
                        &raw.snippet.title,
                        raw.snippet.description.as_deref(),
                    );
                    metadata::insert_metadata_stub(self.store.pool(), &stub, now).await?;
                    added.push(id.clone());
                }
                Err(err) => {
                    tracing::warn!(channel_id = %id, error = %err, "channel fetch failed; skipping");
                    failed.push(FetchFailure {
                        id: id.clone(),
                        reason: err.to_string(),
                    });
                }
            }

            tracing::debug!(processed = idx + 1, total, failures = failed.len(), "channel fetch progress");
        }

        Ok((added, failed))
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<RawChannelStats, ChanbenchError> {
        match tokio::time::timeout(
            self.opts.fetch_timeout,
            self.provider.get_channel_statistics(channel_id),
        )
        .await
        {
            Ok(Some(raw)) => Ok(raw),
            Ok(None) => Err(ChanbenchError::provider_unavailable(
                channel_id,
                "no statistics returned",
            )),
            Err(_) => Err(ChanbenchError::provider_unavailable(
                channel_id,
                format!("timed out after {:?}", self.opts.fetch_timeout),
            )),
        }
    }

    async fn fetch_video(&self, video_id: &str) -> Result<RawVideoStats, ChanbenchError> {
        match tokio::time::timeout(
            self.opts.fetch_timeout,
            self.provider.get_video_statistics(video_id),
        )
        .await
        {
            Ok(Some(raw)) => Ok(raw),
            Ok(None) => Err(ChanbenchError::provider_unavailable(
                video_id,
                "no statistics returned",
            )),
            Err(_) => Err(ChanbenchError::provider_unavailable(
                video_id,
                format!("timed out after {:?}", self.opts.fetch_timeout),
            )),
        }
    }
}
