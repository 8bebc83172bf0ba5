use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// `channels.list` item: `{id, snippet:{title, description?, publishedAt}, statistics:{..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChannelStats {
    pub id: String,
    pub snippet: ChannelSnippet,
    #[serde(default)]
    pub statistics: ChannelStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
}

// The provider sends counts as decimal strings; numbers are accepted too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    #[serde(default, deserialize_with = "de_count")]
    pub subscriber_count: i64,
    #[serde(default, deserialize_with = "de_count")]
    pub video_count: i64,
    #[serde(default, deserialize_with = "de_count")]
    pub view_count: i64,
}

/// `videos.list` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVideoStats {
    pub id: String,
    pub snippet: VideoSnippet,
    #[serde(default)]
    pub statistics: VideoStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: String,
    pub channel_id: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    #[serde(default, deserialize_with = "de_count")]
    pub view_count: i64,
    #[serde(default, deserialize_with = "de_count")]
    pub like_count: i64,
    #[serde(default, deserialize_with = "de_count")]
    pub comment_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// One trading day of price history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

fn de_count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Int(i64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Int(n) => Ok(n),
        Count::Text(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
    }
}
