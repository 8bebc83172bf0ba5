use crate::config::Settings;
use crate::ingest::provider::MarketHistoryProvider;
use crate::ingest::types::DailyBar;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; chanbench/0.1)";

/// Daily OHLC history from the public chart endpoint.
#[derive(Debug, Clone)]
pub struct YahooChartClient {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChartClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .market_data_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let http = reqwest::Client::builder()
            .timeout(settings.provider_timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build market data http client")?;

        Ok(Self { http, base_url })
    }

    fn chart_url(&self, symbol: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("invalid market data base url: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("market data base url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl MarketHistoryProvider for YahooChartClient {
    fn provider_name(&self) -> &'static str {
        "yahoo_chart_v8"
    }

    async fn get_daily_history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyBar>> {
        let url = self.chart_url(symbol)?;
        let res = self
            .http
            .get(url)
            .query(&[
                ("period1", start.timestamp().to_string()),
                ("period2", end.timestamp().to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("chart request failed for {symbol}"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read chart response for {symbol}"))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            anyhow::bail!("chart HTTP {status} for {symbol}: {text}");
        }

        let parsed = serde_json::from_str::<ChartResponse>(&text)
            .with_context(|| format!("failed to parse chart response for {symbol}"))?;
        Ok(parsed.into_bars())
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl ChartResponse {
    // Bars with any missing price (holidays, halted sessions) are dropped.
    fn into_bars(self) -> Vec<DailyBar> {
        let Some(result) = self.chart.result.and_then(|r| r.into_iter().next()) else {
            return Vec::new();
        };
        let Some(quote) = result.indicators.quote.into_iter().next() else {
            return Vec::new();
        };

        let mut bars = Vec::with_capacity(result.timestamp.len());
        for (i, ts) in result.timestamp.iter().enumerate() {
            let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
            let (Some(open), Some(high), Some(low), Some(close)) = (
                field(&quote.open),
                field(&quote.high),
                field(&quote.low),
                field(&quote.close),
            ) else {
                continue;
            };
            let Some(date) = DateTime::from_timestamp(*ts, 0).map(|d| d.date_naive()) else {
                continue;
            };
            bars.push(DailyBar {
                date,
                open,
                high,
                low,
                close,
            });
        }
        bars.sort_by_key(|b| b.date);
        bars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn parses_chart_payload_and_skips_null_bars() {
        let v = json!({
            "chart": {
                "result": [{
                    "meta": {"symbol": "^GSPC"},
                    "timestamp": [1704205800, 1704292200, 1704378600],
                    "indicators": {"quote": [{
                        "open": [100.0, null, 101.0],
                        "high": [102.0, 103.0, 104.0],
                        "low": [99.0, 98.0, 100.5],
                        "close": [101.0, 102.0, 103.5],
                        "volume": [1, 2, 3]
                    }]}
                }],
                "error": null
            }
        });

        let parsed: ChartResponse = serde_json::from_value(v).unwrap();
        let bars = parsed.into_bars();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].close, 103.5);
    }

    #[test]
    fn error_payload_yields_no_bars() {
        let v = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found"}
            }
        });
        let parsed: ChartResponse = serde_json::from_value(v).unwrap();
        assert!(parsed.into_bars().is_empty());
    }

    #[test]
    fn builds_chart_path_for_symbol() {
        let settings = Settings {
            market_data_base_url: Some("http://localhost:9100/".to_string()),
            ..Default::default()
        };
        let client = YahooChartClient::from_settings(&settings).unwrap();
        let url = client.chart_url("^GSPC").unwrap();
        assert_eq!(url.host_str(), Some("localhost"));
        assert!(url.path().starts_with("/v8/finance/chart/"));
        assert!(url.path().ends_with("GSPC"));
    }
}
