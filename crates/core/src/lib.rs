pub mod domain;
pub mod error;
pub mod ingest;
pub mod market;
pub mod storage;
pub mod tracker;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    const DEFAULT_DATABASE_URL: &str = "sqlite://data/chanbench.db";
    const DEFAULT_SEED_PATH: &str = "data/channel_metadata.csv";
    const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_FETCH_DELAY_MS: u64 = 1000;

    pub const DEFAULT_CHANNELS: [&str; 5] = [
        "UCYmQgh9tvqhgEcVvI63l10A",
        "UCTNgTBKATr18Z7kR32rKOBw",
        "UCQxFhbPxp6VtAMGEF8OWG5g",
        "UCBRpqrzuuqE8TZcWw75JSdw",
        "UCRJplQ4Ynuph20iIzFP5tww",
    ];

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub youtube_api_key: Option<String>,
        pub youtube_api_base_url: Option<String>,
        pub market_data_base_url: Option<String>,
        pub provider_timeout_secs: Option<String>,
        pub fetch_delay_ms: Option<String>,
        pub metadata_seed_path: Option<String>,
        pub tracked_channels: Option<String>,
        pub market_symbols: Option<String>,
        pub market_windows: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                youtube_api_key: std::env::var("YOUTUBE_API_KEY").ok(),
                youtube_api_base_url: std::env::var("YOUTUBE_API_BASE_URL").ok(),
                market_data_base_url: std::env::var("MARKET_DATA_BASE_URL").ok(),
                provider_timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS").ok(),
                fetch_delay_ms: std::env::var("FETCH_DELAY_MS").ok(),
                metadata_seed_path: std::env::var("METADATA_SEED_PATH").ok(),
                tracked_channels: std::env::var("TRACKED_CHANNELS").ok(),
                market_symbols: std::env::var("MARKET_SYMBOLS").ok(),
                market_windows: std::env::var("MARKET_WINDOWS").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            })
        }

        pub fn database_url(&self) -> &str {
            self.database_url
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(DEFAULT_DATABASE_URL)
        }

        pub fn require_youtube_api_key(&self) -> anyhow::Result<&str> {
            self.youtube_api_key
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .context("YOUTUBE_API_KEY is required")
        }

        pub fn provider_timeout(&self) -> Duration {
            let secs = self
                .provider_timeout_secs
                .as_deref()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS);
            Duration::from_secs(secs)
        }

        pub fn fetch_delay(&self) -> Duration {
            let ms = self
                .fetch_delay_ms
                .as_deref()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_FETCH_DELAY_MS);
            Duration::from_millis(ms)
        }

        pub fn metadata_seed_path(&self) -> PathBuf {
            PathBuf::from(
                self.metadata_seed_path
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(DEFAULT_SEED_PATH),
            )
        }

        /// Channels tracked when the caller does not name any.
        pub fn default_tracked_channels(&self) -> Vec<String> {
            match self.tracked_channels.as_deref() {
                Some(s) if !s.trim().is_empty() => s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                _ => DEFAULT_CHANNELS.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn falls_back_to_defaults_on_missing_or_malformed_values() {
            let settings = Settings {
                provider_timeout_secs: Some("soon".to_string()),
                fetch_delay_ms: Some("250".to_string()),
                ..Default::default()
            };

            assert_eq!(settings.database_url(), DEFAULT_DATABASE_URL);
            assert_eq!(settings.provider_timeout(), Duration::from_secs(30));
            assert_eq!(settings.fetch_delay(), Duration::from_millis(250));
            assert_eq!(settings.default_tracked_channels().len(), 5);
            assert!(settings.require_youtube_api_key().is_err());
        }

        #[test]
        fn parses_tracked_channel_list() {
            let settings = Settings {
                tracked_channels: Some(" UC1 , ,UC2".to_string()),
                ..Default::default()
            };
            assert_eq!(settings.default_tracked_channels(), vec!["UC1", "UC2"]);
        }
    }
}
