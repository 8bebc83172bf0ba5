//! Reshapes market records into display tables keyed by symbol.
//!
//! Rows and columns follow configuration order and only include what the records contain, so a
//! symbol or window with no data never shows up as a row or column of nulls. Values are rounded
//! to two decimals.

use super::{round2, MarketConfig, MarketMetric, MarketPerformanceRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeMetric {
    High,
    Low,
    Median,
}

impl RangeMetric {
    pub const ALL: [RangeMetric; 3] = [RangeMetric::High, RangeMetric::Low, RangeMetric::Median];

    fn pick(self, metric: &MarketMetric) -> Option<f64> {
        match (self, metric) {
            (RangeMetric::High, MarketMetric::Range { high, .. }) => Some(*high),
            (RangeMetric::Low, MarketMetric::Range { low, .. }) => Some(*low),
            (RangeMetric::Median, MarketMetric::Range { median, .. }) => Some(*median),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotRow {
    pub symbol: String,
    pub cells: Vec<Option<f64>>,
}

/// Performance percent per symbol, one column per window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceTable {
    pub columns: Vec<String>,
    pub rows: Vec<PivotRow>,
}

impl PerformanceTable {
    pub fn from_records(config: &MarketConfig, records: &[MarketPerformanceRecord]) -> Self {
        let pct = |r: &MarketPerformanceRecord| match r.metric {
            MarketMetric::Performance { pct } => Some(pct),
            MarketMetric::Range { .. } => None,
        };

        let columns: Vec<String> = config
            .windows
            .iter()
            .filter(|w| records.iter().any(|r| r.window == w.label && pct(r).is_some()))
            .map(|w| w.label.clone())
            .collect();

        let mut rows = Vec::new();
        for sym in &config.symbols {
            let cells: Vec<Option<f64>> = columns
                .iter()
                .map(|window| {
                    records
                        .iter()
                        .find(|r| r.symbol == sym.label && &r.window == window)
                        .and_then(pct)
                        .map(round2)
                })
                .collect();
            if cells.iter().any(Option::is_some) {
                rows.push(PivotRow {
                    symbol: sym.label.clone(),
                    cells,
                });
            }
        }

        Self { columns, rows }
    }

    pub fn value(&self, symbol: &str, window: &str) -> Option<f64> {
        let col = self.columns.iter().position(|c| c == window)?;
        self.rows
            .iter()
            .find(|r| r.symbol == symbol)
            .and_then(|r| r.cells[col])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeColumn {
    pub metric: RangeMetric,
    pub window: String,
}

/// High, low and median per symbol, columns ordered metric first, then window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeTable {
    pub columns: Vec<RangeColumn>,
    pub rows: Vec<PivotRow>,
}

impl RangeTable {
    pub fn from_records(config: &MarketConfig, records: &[MarketPerformanceRecord]) -> Self {
        let windows: Vec<&str> = config
            .windows
            .iter()
            .map(|w| w.label.as_str())
            .filter(|label| {
                records
                    .iter()
                    .any(|r| r.window == *label && matches!(r.metric, MarketMetric::Range { .. }))
            })
            .collect();

        let columns: Vec<RangeColumn> = RangeMetric::ALL
            .iter()
            .flat_map(|metric| {
                windows.iter().map(move |w| RangeColumn {
                    metric: *metric,
                    window: w.to_string(),
                })
            })
            .collect();

        let mut rows = Vec::new();
        for sym in &config.symbols {
            let cells: Vec<Option<f64>> = columns
                .iter()
                .map(|col| {
                    records
                        .iter()
                        .find(|r| r.symbol == sym.label && r.window == col.window)
                        .and_then(|r| col.metric.pick(&r.metric))
                        .map(round2)
                })
                .collect();
            if cells.iter().any(Option::is_some) {
                rows.push(PivotRow {
                    symbol: sym.label.clone(),
                    cells,
                });
            }
        }

        Self { columns, rows }
    }

    pub fn value(&self, symbol: &str, metric: RangeMetric, window: &str) -> Option<f64> {
        let col = self
            .columns
            .iter()
            .position(|c| c.metric == metric && c.window == window)?;
        self.rows
            .iter()
            .find(|r| r.symbol == symbol)
            .and_then(|r| r.cells[col])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(symbol: &str, window: &str, metric: MarketMetric) -> MarketPerformanceRecord {
        MarketPerformanceRecord {
            symbol: symbol.to_string(),
            window: window.to_string(),
            metric,
        }
    }

    #[test]
    fn pivots_tolerate_partial_data() {
        let config = MarketConfig::default();
        let records = vec![
            record("NASDAQ", "6 Months", MarketMetric::Performance { pct: 4.56789 }),
            record("S&P 500", "1 Month", MarketMetric::Performance { pct: -1.234 }),
            record(
                "VIX",
                "3 Months",
                MarketMetric::Range {
                    high: 30.0,
                    low: 12.346,
                    median: 17.5,
                },
            ),
        ];

        let perf = PerformanceTable::from_records(&config, &records);
        assert_eq!(perf.columns, vec!["1 Month", "6 Months"]);
        assert_eq!(
            perf.rows.iter().map(|r| r.symbol.as_str()).collect::<Vec<_>>(),
            vec!["S&P 500", "NASDAQ"]
        );
        assert_eq!(perf.value("S&P 500", "1 Month"), Some(-1.23));
        assert_eq!(perf.value("S&P 500", "6 Months"), None);
        assert_eq!(perf.value("NASDAQ", "6 Months"), Some(4.57));

        let ranges = RangeTable::from_records(&config, &records);
        assert_eq!(ranges.columns.len(), 3);
        assert_eq!(ranges.rows.len(), 1);
        assert_eq!(ranges.value("VIX", RangeMetric::Low, "3 Months"), Some(12.35));
        assert_eq!(ranges.value("VIX", RangeMetric::High, "3 Months"), Some(30.0));
    }

    #[test]
    fn no_records_give_empty_tables() {
        let config = MarketConfig::default();
        assert_eq!(PerformanceTable::from_records(&config, &[]), PerformanceTable::default());
        assert_eq!(RangeTable::from_records(&config, &[]), RangeTable::default());
    }
}
