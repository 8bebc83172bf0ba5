//! Benchmark index summaries over trailing lookback windows.

pub mod pivot;

use crate::config::Settings;
use crate::ingest::provider::MarketHistoryProvider;
use crate::ingest::types::DailyBar;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use pivot::{PerformanceTable, RangeMetric, RangeTable};

const DEFAULT_SYMBOLS: &str = "S&P 500=^GSPC,NASDAQ=^IXIC,VIX=^VIX:vol";
const DEFAULT_WINDOWS: &str = "1 Month=30,3 Months=90,6 Months=180";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Index,
    Volatility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkSymbol {
    pub label: String,
    pub symbol: String,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackWindow {
    pub label: String,
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketConfig {
    pub symbols: Vec<BenchmarkSymbol>,
    pub windows: Vec<LookbackWindow>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        // Both defaults are well-formed literals.
        Self {
            symbols: parse_symbols(DEFAULT_SYMBOLS).unwrap_or_default(),
            windows: parse_windows(DEFAULT_WINDOWS).unwrap_or_default(),
        }
    }
}

impl MarketConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let symbols = match settings.market_symbols.as_deref() {
            Some(s) if !s.trim().is_empty() => parse_symbols(s).context("invalid MARKET_SYMBOLS")?,
            _ => parse_symbols(DEFAULT_SYMBOLS)?,
        };
        let windows = match settings.market_windows.as_deref() {
            Some(s) if !s.trim().is_empty() => parse_windows(s).context("invalid MARKET_WINDOWS")?,
            _ => parse_windows(DEFAULT_WINDOWS)?,
        };
        Ok(Self { symbols, windows })
    }
}

/// `label=symbol[:vol]`, comma separated.
pub fn parse_symbols(input: &str) -> Result<Vec<BenchmarkSymbol>> {
    let mut out = Vec::new();
    for entry in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((label, rest)) = entry.split_once('=') else {
            bail!("expected label=symbol, got {entry:?}");
        };
        let (symbol, kind) = match rest.trim().split_once(':') {
            Some((sym, "vol")) => (sym, SymbolKind::Volatility),
            Some((_, other)) => bail!("unknown symbol kind {other:?} in {entry:?}"),
            None => (rest.trim(), SymbolKind::Index),
        };
        if label.trim().is_empty() || symbol.trim().is_empty() {
            bail!("empty label or symbol in {entry:?}");
        }
        out.push(BenchmarkSymbol {
            label: label.trim().to_string(),
            symbol: symbol.trim().to_string(),
            kind,
        });
    }
    if out.is_empty() {
        bail!("no benchmark symbols configured");
    }
    Ok(out)
}

/// `label=days`, comma separated.
pub fn parse_windows(input: &str) -> Result<Vec<LookbackWindow>> {
    let mut out = Vec::new();
    for entry in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((label, days)) = entry.split_once('=') else {
            bail!("expected label=days, got {entry:?}");
        };
        let days: i64 = days
            .trim()
            .parse()
            .with_context(|| format!("invalid day count in {entry:?}"))?;
        if days <= 0 || label.trim().is_empty() {
            bail!("invalid lookback window {entry:?}");
        }
        out.push(LookbackWindow {
            label: label.trim().to_string(),
            days,
        });
    }
    if out.is_empty() {
        bail!("no lookback windows configured");
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketMetric {
    Performance { pct: f64 },
    Range { high: f64, low: f64, median: f64 },
}

/// One (symbol, window) summary. Recomputed per request, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPerformanceRecord {
    pub symbol: String,
    pub window: String,
    pub metric: MarketMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSummary {
    pub generated_at: DateTime<Utc>,
    pub records: Vec<MarketPerformanceRecord>,
    pub performance: PerformanceTable,
    pub ranges: RangeTable,
}

pub struct MarketSummaryBuilder {
    provider: Arc<dyn MarketHistoryProvider>,
    config: MarketConfig,
}

impl MarketSummaryBuilder {
    pub fn new(provider: Arc<dyn MarketHistoryProvider>, config: MarketConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Fetches every (symbol, window) pair ending at `now`. Pairs with no history or a
    /// provider error are skipped.
    pub async fn performance_records(&self, now: DateTime<Utc>) -> Vec<MarketPerformanceRecord> {
        let mut out = Vec::new();

        for sym in &self.config.symbols {
            for window in &self.config.windows {
                let start = now - Duration::days(window.days);
                let bars = match self.provider.get_daily_history(&sym.symbol, start, now).await {
                    Ok(bars) => bars,
                    Err(err) => {
                        tracing::warn!(
                            provider = self.provider.provider_name(),
                            symbol = %sym.symbol,
                            window = %window.label,
                            error = %err,
                            "market history fetch failed; skipping"
                        );
                        continue;
                    }
                };

                let Some(metric) = summarize(sym.kind, &bars) else {
                    tracing::debug!(symbol = %sym.symbol, window = %window.label, "no market history in window");
                    continue;
                };
                out.push(MarketPerformanceRecord {
                    symbol: sym.label.clone(),
                    window: window.label.clone(),
                    metric,
                });
            }
        }

        out
    }

    pub async fn summary(&self, now: DateTime<Utc>) -> MarketSummary {
        let records = self.performance_records(now).await;
        let performance = PerformanceTable::from_records(&self.config, &records);
        let ranges = RangeTable::from_records(&self.config, &records);
        tracing::info!(
            records = records.len(),
            performance_rows = performance.rows.len(),
            range_rows = ranges.rows.len(),
            "market summary built"
        );
        MarketSummary {
            generated_at: now,
            records,
            performance,
            ranges,
        }
    }
}

/// `None` when `bars` is empty.
pub fn summarize(kind: SymbolKind, bars: &[DailyBar]) -> Option<MarketMetric> {
    match kind {
        SymbolKind::Index => performance_pct(bars).map(|pct| MarketMetric::Performance { pct }),
        SymbolKind::Volatility => range_summary(bars),
    }
}

/// Percent change from the first close to the last close. A zero first close gives 0.
pub fn performance_pct(bars: &[DailyBar]) -> Option<f64> {
    let first = bars.first()?.close;
    let last = bars.last()?.close;
    if first == 0.0 {
        return Some(0.0);
    }
    Some((last - first) / first * 100.0)
}

pub fn range_summary(bars: &[DailyBar]) -> Option<MarketMetric> {
    if bars.is_empty() {
        return None;
    }
    let high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    Some(MarketMetric::Range {
        high,
        low,
        median: median(&closes)?,
    })
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashMap;

    struct FakeHistory {
        bars: HashMap<String, Vec<DailyBar>>,
        broken: Vec<String>,
    }

    #[async_trait::async_trait]
    impl MarketHistoryProvider for FakeHistory {
        fn provider_name(&self) -> &'static str {
            "fake"
        }

        async fn get_daily_history(
            &self,
            symbol: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<DailyBar>> {
            if self.broken.iter().any(|s| s == symbol) {
                bail!("upstream returned 500");
            }
            Ok(self
                .bars
                .get(symbol)
                .map(|bars| {
                    bars.iter()
                        .filter(|b| b.date >= start.date_naive() && b.date <= end.date_naive())
                        .copied()
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    fn bar(date: NaiveDate, close: f64) -> DailyBar {
        DailyBar {
            date,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    fn series(start: NaiveDate, closes: &[f64]) -> Vec<DailyBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| bar(start + Duration::days(i as i64), *c))
            .collect()
    }

    #[test]
    fn performance_over_fixed_series() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = series(d, &[100.0, 105.0, 98.0, 110.0]);
        assert_eq!(round2(performance_pct(&bars).unwrap()), 10.00);
        assert_eq!(performance_pct(&[]), None);
    }

    #[test]
    fn range_uses_highs_lows_and_median_close() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = series(d, &[20.0, 14.0, 30.0, 16.0]);
        assert_eq!(
            range_summary(&bars),
            Some(MarketMetric::Range {
                high: 31.0,
                low: 13.0,
                median: 18.0
            })
        );
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn parses_symbol_and_window_lists() {
        let cfg = MarketConfig::default();
        assert_eq!(cfg.symbols.len(), 3);
        assert_eq!(cfg.symbols[0].label, "S&P 500");
        assert_eq!(cfg.symbols[2].kind, SymbolKind::Volatility);
        assert_eq!(cfg.windows.iter().map(|w| w.days).collect::<Vec<_>>(), vec![30, 90, 180]);

        assert!(parse_symbols("VIX=^VIX:weird").is_err());
        assert!(parse_windows("Week=0").is_err());
        assert!(parse_windows("Week").is_err());

        let settings = Settings {
            market_windows: Some("2 Weeks=14".to_string()),
            ..Default::default()
        };
        let cfg = MarketConfig::from_settings(&settings).unwrap();
        assert_eq!(cfg.windows, vec![LookbackWindow { label: "2 Weeks".to_string(), days: 14 }]);
        assert_eq!(cfg.symbols.len(), 3);
    }

    #[tokio::test]
    async fn empty_window_is_omitted_without_null_rows() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let today = now.date_naive();
        let mut bars = HashMap::new();
        bars.insert(
            "^GSPC".to_string(),
            series(today - Duration::days(3), &[100.0, 105.0, 98.0, 110.0]),
        );
        // VIX has only old data: nothing inside the 30-day window.
        bars.insert(
            "^VIX".to_string(),
            series(today - Duration::days(60), &[20.0, 14.0, 30.0]),
        );
        let provider = FakeHistory {
            bars,
            broken: vec!["^IXIC".to_string()],
        };
        let builder = MarketSummaryBuilder::new(Arc::new(provider), MarketConfig::default());

        let summary = builder.summary(now).await;

        let pairs: Vec<(&str, &str)> = summary
            .records
            .iter()
            .map(|r| (r.symbol.as_str(), r.window.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("S&P 500", "1 Month"),
                ("S&P 500", "3 Months"),
                ("S&P 500", "6 Months"),
                ("VIX", "3 Months"),
                ("VIX", "6 Months"),
            ]
        );
        assert!(summary
            .records
            .iter()
            .all(|r| matches!(
                (r.symbol.as_str(), r.metric),
                ("S&P 500", MarketMetric::Performance { .. }) | ("VIX", MarketMetric::Range { .. })
            )));

        assert_eq!(summary.performance.rows.len(), 1);
        assert_eq!(summary.performance.value("S&P 500", "1 Month"), Some(10.0));
        assert_eq!(summary.ranges.rows.len(), 1);
        assert_eq!(
            summary.ranges.value("VIX", RangeMetric::Median, "3 Months"),
            Some(20.0)
        );
        assert_eq!(summary.ranges.value("VIX", RangeMetric::High, "1 Month"), None);
    }
}
