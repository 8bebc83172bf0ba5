use crate::ingest::types::{DailyBar, RawChannelStats, RawVideoStats};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Source of public channel and video statistics.
///
/// Transport, auth and parse failures never cross this boundary: implementations log them and
/// return `None`.
#[async_trait::async_trait]
pub trait ChannelStatsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn get_channel_statistics(&self, channel_id: &str) -> Option<RawChannelStats>;

    async fn get_video_statistics(&self, video_id: &str) -> Option<RawVideoStats>;
}

/// Source of daily price history, ordered oldest first. An empty result is not an error.
#[async_trait::async_trait]
pub trait MarketHistoryProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn get_daily_history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyBar>>;
}
