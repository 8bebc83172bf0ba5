use crate::config::Settings;
use crate::ingest::provider::ChannelStatsProvider;
use crate::ingest::types::{ListResponse, RawChannelStats, RawVideoStats};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
const LIST_PARTS: &str = "statistics,snippet";

#[derive(Debug, Clone)]
pub struct YouTubeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl YouTubeClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_youtube_api_key()?.to_string();
        let base_url = settings
            .youtube_api_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let http = reqwest::Client::builder()
            .timeout(settings.provider_timeout())
            .build()
            .context("failed to build youtube http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), resource)
    }

    async fn list_one<T: DeserializeOwned>(&self, resource: &str, id: &str) -> Result<Option<T>> {
        let res = self
            .http
            .get(self.url(resource))
            .query(&[("part", LIST_PARTS), ("id", id), ("key", self.api_key.as_str())])
            .send()
            .await
            .with_context(|| format!("youtube {resource} request failed"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read youtube {resource} response"))?;
        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("youtube {resource} response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("youtube {resource} HTTP {status}: {raw_json}");
        }

        parse_first_item(raw_json)
            .with_context(|| format!("failed to parse youtube {resource} response"))
    }
}

fn parse_first_item<T: DeserializeOwned>(raw_json: Value) -> Result<Option<T>> {
    let parsed = serde_json::from_value::<ListResponse<T>>(raw_json)?;
    Ok(parsed.items.into_iter().next())
}

#[async_trait::async_trait]
impl ChannelStatsProvider for YouTubeClient {
    fn provider_name(&self) -> &'static str {
        "youtube_data_v3"
    }

    async fn get_channel_statistics(&self, channel_id: &str) -> Option<RawChannelStats> {
        match self.list_one::<RawChannelStats>("channels", channel_id).await {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                tracing::warn!(%channel_id, "youtube returned no channel items");
                None
            }
            Err(err) => {
                tracing::warn!(%channel_id, error = %err, "youtube channel fetch failed");
                None
            }
        }
    }

    async fn get_video_statistics(&self, video_id: &str) -> Option<RawVideoStats> {
        match self.list_one::<RawVideoStats>("videos", video_id).await {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                tracing::warn!(%video_id, "youtube returned no video items");
                None
            }
            Err(err) => {
                tracing::warn!(%video_id, error = %err, "youtube video fetch failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_first_item_of_list_response() {
        let v = json!({
            "items": [{
                "id": "UC1",
                "snippet": {"title": "One", "publishedAt": "2015-03-04T17:01:02Z"},
                "statistics": {"viewCount": "5", "subscriberCount": "1", "videoCount": "2"}
            }]
        });
        let item = parse_first_item::<RawChannelStats>(v).unwrap().unwrap();
        assert_eq!(item.id, "UC1");
        assert_eq!(item.statistics.video_count, 2);
    }

    #[test]
    fn empty_items_is_none() {
        let v = json!({"pageInfo": {"totalResults": 0}, "items": []});
        assert!(parse_first_item::<RawChannelStats>(v).unwrap().is_none());
    }

    #[test]
    fn requires_api_key() {
        assert!(YouTubeClient::from_settings(&Settings::default()).is_err());
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let settings = Settings {
            youtube_api_key: Some("k".to_string()),
            youtube_api_base_url: Some("http://localhost:9000/v3/".to_string()),
            ..Default::default()
        };
        let client = YouTubeClient::from_settings(&settings).unwrap();
        assert_eq!(client.url("channels"), "http://localhost:9000/v3/channels");
    }
}
