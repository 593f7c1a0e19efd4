use std::future::Future;
use std::sync::Arc;

use analytics::config::Config;
use analytics::event::RawEvent;
use analytics::pipeline::IngestionPipeline;
use analytics::prometheus::{report_dropped_events, serve, setup_metrics_recorder, setup_metrics_router};
use analytics::store::MemoryStore;
use analytics::time::SystemTime;
use analytics::trends::TrendDetector;
use envconfig::Envconfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

/// Reads newline-delimited JSON events and ingests them in batches of
/// `batch_size`. A line may hold one event or an array of them. Returns the
/// number of events submitted.
///
/// `shutdown` is only raced against reading the next line: a batch that was
/// handed to the pipeline always runs to completion, and events read before
/// shutdown are flushed.
async fn feed<R, S>(
    reader: R,
    pipeline: &IngestionPipeline,
    batch_size: usize,
    shutdown: S,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut lines = reader.lines();
    let mut pending: Vec<RawEvent> = Vec::new();
    let mut submitted = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                tracing::info!("stopped reading events");
                break;
            }
        };
        let Some(line) = line else {
            tracing::info!("event feed exhausted");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match RawEvent::from_bytes(line.as_bytes()) {
            Ok(events) => pending.extend(events),
            Err(err) => {
                tracing::warn!("skipping undecodable line: {}", err);
                report_dropped_events(err.stage(), 1);
            }
        }

        if pending.len() >= batch_size {
            submitted += pending.len() as u64;
            pipeline.ingest_batch(std::mem::take(&mut pending)).await;
        }
    }

    if !pending.is_empty() {
        submitted += pending.len() as u64;
        pipeline.ingest_batch(pending).await;
    }

    Ok(submitted)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(config.log_level).into())
                .from_env_lossy(),
        )
        .init();

    if config.export_prometheus {
        let recorder = setup_metrics_recorder()?;
        let router = setup_metrics_router(recorder);
        let bind = config.address;
        tracing::info!("serving metrics on {}", bind);
        tokio::spawn(async move {
            if let Err(err) = serve(router, bind).await {
                tracing::error!("failed to serve metrics: {}", err);
            }
        });
    }

    let timesource = Arc::new(SystemTime {});
    let store = Arc::new(MemoryStore::new(timesource.clone()));
    let pipeline = IngestionPipeline::new(store.clone(), timesource.clone(), config.pipeline.clone());
    let trends = TrendDetector::new(store, timesource);

    let stdin = BufReader::new(tokio::io::stdin());
    let submitted = feed(stdin, &pipeline, config.pipeline.batch_size.get(), shutdown()).await?;
    tracing::info!(submitted, "event feed stopped");

    let stats = pipeline.get_stats();
    tracing::info!(
        processed = stats.processed_count,
        failed = stats.failed_count,
        success_rate = stats.success_rate,
        "final processing stats"
    );

    match trends.detect_trending(config.trending_limit).await {
        Ok(trending) => {
            let trending = serde_json::to_string(&trending)?;
            tracing::info!(trending, "trending videos");
        }
        Err(err) => tracing::error!("failed to compute trending videos: {}", err),
    }
    tracing::info!(size = pipeline.window().len(), "recent event window");

    let live = serde_json::to_string(&pipeline.realtime_stats())?;
    tracing::info!(live, "real-time stats");

    Ok(())
}
