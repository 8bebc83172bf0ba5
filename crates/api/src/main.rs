use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chanbench_core::config::Settings;
use chanbench_core::domain::comparison::{ChannelComparisonRow, ComparisonMetric};
use chanbench_core::domain::metadata::{ChannelMetadata, MetadataFields};
use chanbench_core::domain::sync::SyncReport;
use chanbench_core::error::ChanbenchError;
use chanbench_core::ingest::yahoo::YahooChartClient;
use chanbench_core::ingest::youtube::YouTubeClient;
use chanbench_core::market::{MarketConfig, MarketSummary, MarketSummaryBuilder};
use chanbench_core::storage::{self, Store};
use chanbench_core::tracker::{ChannelTracker, TrackedChannelSet, TrackerOptions};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

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

    let store = match Store::open(settings.database_url()).await {
        Ok(store) => Some(store),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "store open failed; starting API in degraded mode");
            None
        }
    };

    let session = match &store {
        Some(store) => match start_session(&settings, store).await {
            Ok(session) => Some(Arc::new(Mutex::new(session))),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "session setup failed; starting API in degraded mode");
                None
            }
        },
        None => None,
    };

    let market = match build_market(&settings) {
        Ok(builder) => Some(Arc::new(builder)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "market summary disabled");
            None
        }
    };

    let state = AppState { session, market };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/channels", get(get_channels).put(put_channels))
        .route("/comparison", get(get_comparison))
        .route("/metadata", get(get_metadata))
        .route("/metadata/:channel_id", axum::routing::put(put_metadata))
        .route("/market/summary", get(get_market_summary))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(store) = store {
        store.close().await;
    }
    served?;

    Ok(())
}

/// Loads the metadata seed and tracks the default channels.
///
/// Without a statistics provider the session still serves store-backed routes; only set updates
/// are refused. A failed startup backfill is logged and does not stop the session.
async fn start_session(settings: &Settings, store: &Store) -> anyhow::Result<Session> {
    storage::seed::load_metadata_seed(store.pool(), &settings.metadata_seed_path(), Utc::now())
        .await?;

    let tracked = TrackedChannelSet::new(settings.default_tracked_channels());

    let tracker = match YouTubeClient::from_settings(settings) {
        Ok(provider) => Some(ChannelTracker::new(
            store.clone(),
            Arc::new(provider),
            TrackerOptions::from_settings(settings),
        )),
        Err(e) => {
            tracing::warn!(error = %e, "statistics provider unavailable; channel updates disabled");
            None
        }
    };

    if let Some(tracker) = &tracker {
        match tracker.ensure_snapshots(&tracked).await {
            Ok(failed) if !failed.is_empty() => {
                tracing::warn!(failed = failed.len(), "some tracked channels have no snapshot");
            }
            Ok(_) => {}
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "startup backfill failed");
            }
        }
    }

    Ok(Session {
        store: store.clone(),
        tracker,
        tracked,
    })
}

fn build_market(settings: &Settings) -> anyhow::Result<MarketSummaryBuilder> {
    let provider = YahooChartClient::from_settings(settings)?;
    let config = MarketConfig::from_settings(settings)?;
    Ok(MarketSummaryBuilder::new(Arc::new(provider), config))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Store, tracked set and facade. Every store-backed request holds this lock.
struct Session {
    store: Store,
    tracker: Option<ChannelTracker>,
    tracked: TrackedChannelSet,
}

#[derive(Clone)]
struct AppState {
    session: Option<Arc<Mutex<Session>>>,
    market: Option<Arc<MarketSummaryBuilder>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelList {
    channels: Vec<String>,
}

async fn get_channels(State(state): State<AppState>) -> Result<Json<ChannelList>, StatusCode> {
    let Some(session) = &state.session else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let session = session.lock().await;
    Ok(Json(ChannelList {
        channels: session.tracked.list(),
    }))
}

async fn put_channels(
    State(state): State<AppState>,
    Json(body): Json<ChannelList>,
) -> Result<Json<SyncReport>, StatusCode> {
    let Some(session) = &state.session else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let mut guard = session.lock().await;
    let Session {
        tracker, tracked, ..
    } = &mut *guard;
    let Some(tracker) = tracker.as_ref() else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let report = tracker
        .update_tracked_set(tracked, TrackedChannelSet::new(body.channels))
        .await
        .map_err(error_status)?;

    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
struct ComparisonQuery {
    /// Comma separated metric names.
    metrics: Option<String>,
}

#[derive(Debug, Serialize)]
struct MetricRanking {
    metric: ComparisonMetric,
    ranked: Vec<(String, f64)>,
    industry_average: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ComparisonResponse {
    rows: Vec<ChannelComparisonRow>,
    missing: Vec<String>,
    rankings: Vec<MetricRanking>,
}

async fn get_comparison(
    State(state): State<AppState>,
    Query(query): Query<ComparisonQuery>,
) -> Result<Json<ComparisonResponse>, StatusCode> {
    let Some(session) = &state.session else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let metrics = match query.metrics.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => raw
            .split(',')
            .map(|m| m.parse::<ComparisonMetric>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| StatusCode::BAD_REQUEST)?,
        None => ComparisonMetric::DEFAULT_SELECTION.to_vec(),
    };

    let session = session.lock().await;
    let view = storage::channel_stats::latest_channel_snapshots_joined(
        session.store.pool(),
        session.tracked.iter(),
    )
    .await
    .map_err(error_status)?;
    let missing = view.missing(session.tracked.iter());

    let rankings = metrics
        .into_iter()
        .map(|metric| MetricRanking {
            metric,
            ranked: view.ranked(metric),
            industry_average: view.industry_average(metric),
        })
        .collect();

    Ok(Json(ComparisonResponse {
        rows: view.rows,
        missing,
        rankings,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct MetadataQuery {
    channel_id: Option<String>,
}

async fn get_metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<Vec<ChannelMetadata>>, StatusCode> {
    let Some(session) = &state.session else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let session = session.lock().await;

    let rows =
        storage::metadata::get_channel_metadata(session.store.pool(), query.channel_id.as_deref())
            .await
            .map_err(error_status)?;
    Ok(Json(rows))
}

async fn put_metadata(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Json(fields): Json<MetadataFields>,
) -> Result<Json<ChannelMetadata>, StatusCode> {
    let Some(session) = &state.session else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let session = session.lock().await;

    let saved = storage::metadata::upsert_channel_metadata(
        session.store.pool(),
        &channel_id,
        fields,
        Utc::now(),
    )
    .await
    .map_err(error_status)?;

    tracing::info!(%channel_id, "channel metadata updated");
    Ok(Json(saved))
}

async fn get_market_summary(
    State(state): State<AppState>,
) -> Result<Json<MarketSummary>, StatusCode> {
    let Some(market) = &state.market else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    Ok(Json(market.summary(Utc::now()).await))
}

/// Validation errors map to 422; everything else is reported to Sentry.
fn error_status(err: anyhow::Error) -> StatusCode {
    match err.downcast_ref::<ChanbenchError>() {
        Some(ChanbenchError::Validation { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ChanbenchError::StoreUnavailable(_)) => {
            sentry_anyhow::capture_anyhow(&err);
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_validation_errors_to_422() {
        let err = anyhow::Error::new(ChanbenchError::validation("firm_type", "crypto"));
        assert_eq!(error_status(err), StatusCode::UNPROCESSABLE_ENTITY);

        let err = anyhow::Error::new(ChanbenchError::validation("content_type", "reels"))
            .context("upsert failed");
        assert_eq!(error_status(err), StatusCode::UNPROCESSABLE_ENTITY);

        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(error_status(err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    fn offline_settings() -> Settings {
        Settings {
            metadata_seed_path: Some("/nonexistent/chanbench-seed.csv".to_string()),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn store_routes_work_without_an_api_key() {
        let store = Store::open_in_memory().await.unwrap();
        let settings = offline_settings();
        assert!(settings.youtube_api_key.is_none());

        let session = start_session(&settings, &store).await.unwrap();
        assert!(session.tracker.is_none());
        let state = AppState {
            session: Some(Arc::new(Mutex::new(session))),
            market: None,
        };

        let fields = MetadataFields {
            firm_type: Some("podcast".to_string()),
            target_audience: vec!["general".to_string()],
            ..Default::default()
        };
        let saved = put_metadata(
            State(state.clone()),
            Path("UC1".to_string()),
            Json(fields),
        )
        .await
        .unwrap();
        assert_eq!(saved.0.channel_id, "UC1");

        let rows = get_metadata(
            State(state.clone()),
            Query(MetadataQuery {
                channel_id: Some("UC1".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(rows.0.len(), 1);

        let bad = MetadataFields {
            firm_type: Some("crypto".to_string()),
            ..Default::default()
        };
        let status = put_metadata(State(state.clone()), Path("UC2".to_string()), Json(bad))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let comparison = get_comparison(State(state.clone()), Query(ComparisonQuery::default()))
            .await
            .unwrap();
        assert!(comparison.0.rows.is_empty());
        assert_eq!(comparison.0.missing.len(), settings.default_tracked_channels().len());

        let channels = get_channels(State(state.clone())).await.unwrap();
        assert_eq!(channels.0.channels.len(), settings.default_tracked_channels().len());

        let status = put_channels(
            State(state),
            Json(ChannelList {
                channels: vec!["UC1".to_string()],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        store.close().await;
    }

    #[tokio::test]
    async fn closed_store_maps_to_503() {
        let store = Store::open_in_memory().await.unwrap();
        let session = start_session(&offline_settings(), &store).await.unwrap();
        let state = AppState {
            session: Some(Arc::new(Mutex::new(session))),
            market: None,
        };
        store.close().await;

        let status = get_metadata(State(state), Query(MetadataQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
