use anyhow::Context;
use chanbench_core::config::Settings;
use chanbench_core::domain::comparison::ComparisonMetric;
use chanbench_core::ingest::yahoo::YahooChartClient;
use chanbench_core::ingest::youtube::YouTubeClient;
use chanbench_core::market::{MarketConfig, MarketSummaryBuilder};
use chanbench_core::storage::{self, Store};
use chanbench_core::tracker::{ChannelTracker, TrackedChannelSet, TrackerOptions};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "chanbench_worker")]
struct Args {
    /// Skip loading the metadata seed file before running the command.
    #[arg(long)]
    skip_seed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the curated metadata seed file and print the per-row report.
    LoadSeed,

    /// Bring stored snapshots in line with the given channel set.
    Sync {
        /// Desired channel ids, comma separated. Defaults to TRACKED_CHANNELS.
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,
    },

    /// Print the comparison view for the given channels.
    Compare {
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,

        /// Metrics to rank by (e.g. subscriber_count,videos_per_month).
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
    },

    /// Fetch video statistics, then recompute engagement metrics.
    FetchVideos {
        #[arg(required = true)]
        video_ids: Vec<String>,
    },

    /// Recompute engagement metrics over the whole video table.
    RecomputeVideos,

    /// Print market performance and range tables.
    Market,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let store = Store::open(settings.database_url()).await?;
    let result = run(&settings, &store, args).await;
    store.close().await;

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "worker run failed");
    }
    result
}

async fn run(settings: &Settings, store: &Store, args: Args) -> anyhow::Result<()> {
    let now = chrono::Utc::now();

    if !args.skip_seed && !matches!(args.command, Command::LoadSeed | Command::Market) {
        storage::seed::load_metadata_seed(store.pool(), &settings.metadata_seed_path(), now).await?;
    }

    match args.command {
        Command::LoadSeed => {
            let report =
                storage::seed::load_metadata_seed(store.pool(), &settings.metadata_seed_path(), now)
                    .await?;
            print_json(&report)
        }
        Command::Sync { channels } => {
            let tracker = build_tracker(settings, store)?;
            let mut tracked = TrackedChannelSet::new(
                storage::channel_stats::snapshot_channel_ids(store.pool()).await?,
            );
            let desired = desired_set(settings, channels);

            let report = tracker.update_tracked_set(&mut tracked, desired).await?;
            if !report.is_complete() {
                tracing::warn!(failed = ?report.failed_ids(), "some channels could not be fetched");
            }
            print_json(&report)
        }
        Command::Compare { channels, metrics } => {
            let tracked = desired_set(settings, channels);
            let view = storage::channel_stats::latest_channel_snapshots_joined(
                store.pool(),
                tracked.iter(),
            )
            .await?;

            let missing = view.missing(tracked.iter());
            if !missing.is_empty() {
                tracing::warn!(?missing, "channels without snapshots omitted from comparison");
            }

            let metrics = if metrics.is_empty() {
                ComparisonMetric::DEFAULT_SELECTION.to_vec()
            } else {
                metrics
                    .iter()
                    .map(|m| m.parse::<ComparisonMetric>())
                    .collect::<Result<Vec<_>, _>>()
                    .context("invalid --metrics")?
            };

            let rankings: Vec<MetricRanking> = metrics
                .into_iter()
                .map(|metric| MetricRanking {
                    metric,
                    ranked: view.ranked(metric),
                    industry_average: view.industry_average(metric),
                })
                .collect();

            print_json(&CompareOutput {
                rows: &view.rows,
                missing,
                rankings,
            })
        }
        Command::FetchVideos { video_ids } => {
            let tracker = build_tracker(settings, store)?;
            let report = tracker.fetch_videos(&video_ids).await?;
            let updated = storage::video_stats::recompute_video_metrics(store.pool(), now).await?;
            tracing::info!(recorded = report.recorded.len(), updated, "video fetch finished");
            print_json(&report)
        }
        Command::RecomputeVideos => {
            let updated = storage::video_stats::recompute_video_metrics(store.pool(), now).await?;
            tracing::info!(updated, "recomputed video metrics");
            Ok(())
        }
        Command::Market => {
            let provider = YahooChartClient::from_settings(settings)?;
            let config = MarketConfig::from_settings(settings)?;
            let builder = MarketSummaryBuilder::new(Arc::new(provider), config);
            let summary = builder.summary(now).await;
            print_json(&summary)
        }
    }
}

#[derive(Serialize)]
struct MetricRanking {
    metric: ComparisonMetric,
    ranked: Vec<(String, f64)>,
    industry_average: Option<f64>,
}

#[derive(Serialize)]
struct CompareOutput<'a> {
    rows: &'a [chanbench_core::domain::comparison::ChannelComparisonRow],
    missing: Vec<String>,
    rankings: Vec<MetricRanking>,
}

fn build_tracker(settings: &Settings, store: &Store) -> anyhow::Result<ChannelTracker> {
    let provider = YouTubeClient::from_settings(settings)?;
    Ok(ChannelTracker::new(
        store.clone(),
        Arc::new(provider),
        TrackerOptions::from_settings(settings),
    ))
}

fn desired_set(settings: &Settings, channels: Vec<String>) -> TrackedChannelSet {
    if channels.is_empty() {
        TrackedChannelSet::new(settings.default_tracked_channels())
    } else {
        TrackedChannelSet::new(channels)
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output failed")?;
    println!("{out}");
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
