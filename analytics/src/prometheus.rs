// prometheus exporter setup

use axum::{routing::get, Router};
use metrics::counter;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

pub const EVENTS_RECEIVED_TOTAL: &str = "analytics_events_received_total";
pub const EVENTS_INGESTED_TOTAL: &str = "analytics_events_ingested_total";
pub const EVENTS_DROPPED_TOTAL: &str = "analytics_events_dropped_total";
pub const EVENT_BATCH_SIZE: &str = "analytics_event_batch_size";
pub const ASYNC_JOBS_SATURATION: &str = "analytics_async_jobs_saturation_percent";
pub const INGEST_DURATION_SECONDS: &str = "analytics_ingest_duration_seconds";
pub const STATS_SNAPSHOT_FAILURES_TOTAL: &str = "analytics_stats_snapshot_failures_total";

pub fn report_dropped_events(cause: &'static str, quantity: u64) {
    counter!(EVENTS_DROPPED_TOTAL, "cause" => cause).increment(quantity);
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];
    const BATCH_SIZES: &[f64] = &[
        1.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), EXPONENTIAL_SECONDS)?
        .set_buckets_for_metric(Matcher::Suffix("_batch_size".to_string()), BATCH_SIZES)?
        .install_recorder()
}

/// Build a Router exposing the recorder's metrics.
pub fn setup_metrics_router(recorder_handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

/// Bind a `TcpListener` on the provided address and serve the router on it.
pub async fn serve(router: Router, bind: std::net::SocketAddr) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}
