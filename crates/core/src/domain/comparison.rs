use crate::domain::metadata::ChannelMetadata;
use crate::domain::stats::ChannelStatsSnapshot;
use crate::error::ChanbenchError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Latest snapshot of one channel, left-joined with its curated metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelComparisonRow {
    #[serde(flatten)]
    pub snapshot: ChannelStatsSnapshot,
    pub metadata: Option<ChannelMetadata>,
}

/// Rows for the requested channels that have at least one snapshot.
///
/// Channels without a snapshot are absent, never represented as empty rows; use
/// [`ComparisonView::missing`] to find them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonView {
    pub rows: Vec<ChannelComparisonRow>,
}

impl ComparisonView {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn channel_ids(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .map(|r| r.snapshot.channel_id.as_str())
            .collect()
    }

    pub fn get(&self, channel_id: &str) -> Option<&ChannelComparisonRow> {
        self.rows.iter().find(|r| r.snapshot.channel_id == channel_id)
    }

    /// Requested ids that produced no row.
    pub fn missing<'a, I>(&self, requested: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present = self.channel_ids();
        requested
            .into_iter()
            .filter(|id| !present.contains(id))
            .map(str::to_string)
            .collect()
    }

    /// `(title, value)` pairs sorted ascending by the metric.
    pub fn ranked(&self, metric: ComparisonMetric) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .rows
            .iter()
            .map(|r| (r.snapshot.title.clone(), metric.value(&r.snapshot)))
            .collect();
        out.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        out
    }

    /// Mean of the metric across the rows present.
    pub fn industry_average(&self, metric: ComparisonMetric) -> Option<f64> {
        if self.rows.is_empty() {
            return None;
        }
        let sum: f64 = self.rows.iter().map(|r| metric.value(&r.snapshot)).sum();
        Some(sum / self.rows.len() as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMetric {
    SubscriberCount,
    ViewCount,
    VideoCount,
    ChannelAgeDays,
    AvgViewsPerVideo,
    SubscriberViewRatio,
    VideosPerMonth,
}

impl ComparisonMetric {
    pub const ALL: [ComparisonMetric; 7] = [
        ComparisonMetric::SubscriberCount,
        ComparisonMetric::ViewCount,
        ComparisonMetric::VideoCount,
        ComparisonMetric::ChannelAgeDays,
        ComparisonMetric::AvgViewsPerVideo,
        ComparisonMetric::SubscriberViewRatio,
        ComparisonMetric::VideosPerMonth,
    ];

    pub const DEFAULT_SELECTION: [ComparisonMetric; 4] = [
        ComparisonMetric::SubscriberCount,
        ComparisonMetric::SubscriberViewRatio,
        ComparisonMetric::VideosPerMonth,
        ComparisonMetric::AvgViewsPerVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonMetric::SubscriberCount => "subscriber_count",
            ComparisonMetric::ViewCount => "view_count",
            ComparisonMetric::VideoCount => "video_count",
            ComparisonMetric::ChannelAgeDays => "channel_age_days",
            ComparisonMetric::AvgViewsPerVideo => "avg_views_per_video",
            ComparisonMetric::SubscriberViewRatio => "subscriber_view_ratio",
            ComparisonMetric::VideosPerMonth => "videos_per_month",
        }
    }

    pub fn value(&self, snapshot: &ChannelStatsSnapshot) -> f64 {
        match self {
            ComparisonMetric::SubscriberCount => snapshot.subscriber_count as f64,
            ComparisonMetric::ViewCount => snapshot.view_count as f64,
            ComparisonMetric::VideoCount => snapshot.video_count as f64,
            ComparisonMetric::ChannelAgeDays => snapshot.channel_age_days as f64,
            ComparisonMetric::AvgViewsPerVideo => snapshot.avg_views_per_video,
            ComparisonMetric::SubscriberViewRatio => snapshot.subscriber_view_ratio,
            ComparisonMetric::VideosPerMonth => snapshot.videos_per_month,
        }
    }
}

impl FromStr for ComparisonMetric {
    type Err = ChanbenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == needle)
            .ok_or_else(|| ChanbenchError::validation("metric", s))
    }
}
