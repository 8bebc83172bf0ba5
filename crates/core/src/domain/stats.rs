use crate::ingest::types::{RawChannelStats, RawVideoStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Average month length used for per-month rates.
pub const DAYS_PER_MONTH: f64 = 30.44;

/// `numerator / denominator`, or 0 when the denominator is not positive.
pub fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

/// Whole calendar days between `published_at` and `now`, never negative.
pub fn age_days(published_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - published_at.date_naive())
        .num_days()
        .max(0)
}

/// Age used as a divisor for rates. A same-day item counts as one day old.
pub fn rate_age_days(age_days: i64) -> i64 {
    age_days.max(1)
}

/// One fetch of a channel's aggregate statistics with derived metrics computed at insert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatsSnapshot {
    pub channel_id: String,
    pub title: String,
    pub subscriber_count: i64,
    pub video_count: i64,
    pub view_count: i64,
    pub published_at: DateTime<Utc>,
    pub avg_views_per_video: f64,
    pub subscriber_view_ratio: f64,
    pub channel_age_days: i64,
    pub videos_per_month: f64,
    pub fetched_at: DateTime<Utc>,
}

impl ChannelStatsSnapshot {
    pub fn derive(raw: &RawChannelStats, fetched_at: DateTime<Utc>) -> Self {
        let stats = &raw.statistics;
        let channel_age_days = age_days(raw.snippet.published_at, fetched_at);
        let videos_per_month =
            stats.video_count as f64 / (rate_age_days(channel_age_days) as f64 / DAYS_PER_MONTH);

        Self {
            channel_id: raw.id.trim().to_string(),
            title: raw.snippet.title.trim().to_string(),
            subscriber_count: stats.subscriber_count,
            video_count: stats.video_count,
            view_count: stats.view_count,
            published_at: raw.snippet.published_at,
            avg_views_per_video: ratio(stats.view_count, stats.video_count),
            subscriber_view_ratio: ratio(stats.subscriber_count, stats.view_count),
            channel_age_days,
            videos_per_month,
            fetched_at,
        }
    }
}

/// Engagement metrics for one video. Filled by the batch recomputation pass, not at insert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetrics {
    pub like_ratio: f64,
    pub comment_ratio: f64,
    pub engagement_score: f64,
    pub video_age_days: i64,
    pub views_per_day: f64,
}

impl VideoMetrics {
    pub fn compute(
        view_count: i64,
        like_count: i64,
        comment_count: i64,
        published_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let video_age_days = age_days(published_at, now);
        Self {
            like_ratio: ratio(like_count, view_count),
            comment_ratio: ratio(comment_count, view_count),
            engagement_score: ratio(like_count + comment_count, view_count),
            video_age_days,
            views_per_day: view_count as f64 / rate_age_days(video_age_days) as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStatsSnapshot {
    pub video_id: String,
    pub title: String,
    pub channel_id: String,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub published_at: DateTime<Utc>,
    pub metrics: Option<VideoMetrics>,
    pub fetched_at: DateTime<Utc>,
}

impl VideoStatsSnapshot {
    pub fn from_raw(raw: &RawVideoStats, fetched_at: DateTime<Utc>) -> Self {
        Self {
            video_id: raw.id.trim().to_string(),
            title: raw.snippet.title.trim().to_string(),
            channel_id: raw.snippet.channel_id.trim().to_string(),
            view_count: raw.statistics.view_count,
            like_count: raw.statistics.like_count,
            comment_count: raw.statistics.comment_count,
            published_at: raw.snippet.published_at,
            metrics: None,
            fetched_at,
        }
    }
}
