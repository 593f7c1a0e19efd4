//! Event ingestion: validate, enrich, persist, then aggregate.
//!
//! Persisting comes before any in-memory state is touched. Once an event is
//! durable, its profile update runs first, then the stats update and the
//! window insert, which cannot fail. A profile failure is counted as an
//! aggregation failure and is not rolled back. The stats snapshot write that
//! follows is best-effort and never fails the event.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Span};

use crate::api::{
    AnalyticsError, BatchProcessingResult, EventProcessingResult, ProcessingStats, RealTimeStats,
};
use crate::config::PipelineConfig;
use crate::event::{Event, RawEvent};
use crate::processing::process_single_event;
use crate::profile::ProfileLocks;
use crate::prometheus::{
    report_dropped_events, ASYNC_JOBS_SATURATION, EVENTS_INGESTED_TOTAL, EVENTS_RECEIVED_TOTAL,
    EVENT_BATCH_SIZE, INGEST_DURATION_SECONDS, STATS_SNAPSHOT_FAILURES_TOTAL,
};
use crate::stats::StatsAccumulator;
use crate::store::{EventStore, StoreError};
use crate::time::TimeSource;
use crate::window::RecentEventWindow;

/// Category recorded for WATCH events on videos missing from the catalog.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Videos listed in the real-time summary.
pub const REALTIME_TOP_VIDEOS: usize = 5;

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn EventStore + Send + Sync>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    stats: Arc<StatsAccumulator>,
    window: Arc<RecentEventWindow>,
    counters: Arc<Counters>,
    profile_locks: Arc<ProfileLocks>,
    jobs: Arc<Semaphore>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn EventStore + Send + Sync>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        config: PipelineConfig,
    ) -> Self {
        info!(
            batch_size = config.batch_size.get(),
            window_capacity = config.window_capacity,
            max_concurrent_jobs = config.max_concurrent_jobs.get(),
            "ingestion pipeline initialized"
        );

        Self {
            stats: Arc::new(StatsAccumulator::new(timesource.clone())),
            window: Arc::new(RecentEventWindow::new(config.window_capacity)),
            counters: Arc::default(),
            profile_locks: Arc::new(ProfileLocks::new()),
            jobs: Arc::new(Semaphore::new(config.max_concurrent_jobs.get())),
            store,
            timesource,
            config,
        }
    }

    pub fn stats(&self) -> &Arc<StatsAccumulator> {
        &self.stats
    }

    pub fn window(&self) -> &Arc<RecentEventWindow> {
        &self.window
    }

    /// Per-user guards for profile updates. Share them with any other
    /// component that rewrites profiles.
    pub fn profile_locks(&self) -> &Arc<ProfileLocks> {
        &self.profile_locks
    }

    /// Point-in-time copy of the recent-event window.
    pub fn snapshot(&self) -> Vec<Event> {
        self.window.snapshot()
    }

    /// Ingests one event. Failures are counted and reported in the result,
    /// never retried.
    #[instrument(skip_all, fields(event_id))]
    pub async fn ingest_one(&self, event: RawEvent) -> EventProcessingResult {
        counter!(EVENTS_RECEIVED_TOTAL).increment(1);
        let event_id = event.reported_id();
        Span::current().record("event_id", event_id.as_str());
        let start = Instant::now();

        let result = match self.process_one(&event).await {
            Ok(()) => {
                self.record_processed(1);
                EventProcessingResult::accepted(event_id)
            }
            Err(err) => {
                self.record_failed(&event_id, &err, 1);
                EventProcessingResult::failed(event_id, &err)
            }
        };

        histogram!(INGEST_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        result
    }

    /// Ingests a batch in sub-batches of `batch_size`. Each sub-batch is
    /// persisted with one bulk write; a failed write drops that sub-batch
    /// only.
    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn ingest_batch(&self, events: Vec<RawEvent>) -> BatchProcessingResult {
        counter!(EVENTS_RECEIVED_TOTAL).increment(events.len() as u64);

        let mut processed_count = 0;
        let mut failed_count = 0;
        for chunk in events.chunks(self.config.batch_size.get()) {
            let (processed, failed) = self.process_sub_batch(chunk).await;
            processed_count += processed;
            failed_count += failed;
        }

        info!(processed_count, failed_count, "processed event batch");
        BatchProcessingResult {
            processed_count,
            failed_count,
            message: format!("processed {processed_count} events, {failed_count} failed"),
        }
    }

    /// Schedules `ingest_one` on the worker pool and returns immediately.
    /// The outcome is only observable through the handle and the counters.
    ///
    /// A permit is taken before anything is spawned, so at most
    /// `max_concurrent_jobs` ingestions are ever queued or running. When the
    /// pool is full the event is rejected with a `WorkerError` right away.
    pub fn ingest_async(&self, event: RawEvent) -> IngestHandle {
        let event_id = event.reported_id();

        let permit: OwnedSemaphorePermit = match self.jobs.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(err) => {
                counter!(EVENTS_RECEIVED_TOTAL).increment(1);
                let err = AnalyticsError::WorkerError(format!("worker pool rejected event: {err}"));
                self.record_failed(&event_id, &err, 1);
                return IngestHandle {
                    state: HandleState::Rejected(EventProcessingResult::failed(
                        event_id.clone(),
                        &err,
                    )),
                    event_id,
                };
            }
        };
        self.report_saturation();

        let pipeline = self.clone();
        let inner = tokio::spawn(async move {
            let result = pipeline.ingest_one(event).await;
            drop(permit);
            pipeline.report_saturation();
            result
        });

        IngestHandle {
            event_id,
            state: HandleState::Spawned(inner),
        }
    }

    pub fn get_stats(&self) -> ProcessingStats {
        ProcessingStats::new(
            self.counters.processed.load(Ordering::Relaxed),
            self.counters.failed.load(Ordering::Relaxed),
        )
    }

    /// Summary of the live state: counters, the most viewed videos and the
    /// users behind the recent-event window.
    pub fn realtime_stats(&self) -> RealTimeStats {
        let recent = self.window.snapshot();
        let active_users: HashSet<&str> = recent.iter().map(|e| e.user_id.as_str()).collect();
        let current_viewers: HashSet<&str> = recent
            .iter()
            .filter(|e| e.is_watch())
            .map(|e| e.user_id.as_str())
            .collect();

        let top_video_ids: Vec<String> = self
            .stats
            .top_videos(REALTIME_TOP_VIDEOS)
            .into_iter()
            .filter(|s| s.total_views > 0)
            .map(|s| s.video_id)
            .collect();

        RealTimeStats {
            total_events_processed: self.counters.processed.load(Ordering::Relaxed),
            active_users: active_users.len(),
            current_viewers: current_viewers.len(),
            average_watch_time: self.stats.average_watch_time(),
            most_watched_video_id: top_video_ids.first().cloned(),
            top_video_ids,
            timestamp: self.timesource.current_time(),
        }
    }

    async fn process_one(&self, raw: &RawEvent) -> Result<(), AnalyticsError> {
        let event = process_single_event(raw, self.timesource.current_time())?;

        self.store
            .save(event.clone())
            .await
            .map_err(AnalyticsError::PersistenceError)?;

        self.aggregate(event).await
    }

    async fn process_sub_batch(&self, chunk: &[RawEvent]) -> (u64, u64) {
        let now = self.timesource.current_time();
        let mut failed = 0;
        let mut valid = Vec::with_capacity(chunk.len());

        for raw in chunk {
            match process_single_event(raw, now) {
                Ok(event) => valid.push(event),
                Err(err) => {
                    self.record_failed(&raw.reported_id(), &err, 1);
                    failed += 1;
                }
            }
        }

        if valid.is_empty() {
            return (0, failed);
        }

        let size = valid.len() as u64;
        if let Err(err) = self.store.save_batch(valid.clone()).await {
            let err = AnalyticsError::PersistenceError(err);
            error!(events = size, "failed to persist sub-batch: {}", err);
            self.counters.failed.fetch_add(size, Ordering::Relaxed);
            report_dropped_events(err.stage(), size);
            return (0, failed + size);
        }
        histogram!(EVENT_BATCH_SIZE).record(size as f64);

        let mut processed = 0;
        for event in valid {
            let event_id = event.event_id.clone();
            match self.aggregate(event).await {
                Ok(()) => {
                    self.record_processed(1);
                    processed += 1;
                }
                Err(err) => {
                    self.record_failed(&event_id, &err, 1);
                    failed += 1;
                }
            }
        }

        (processed, failed)
    }

    async fn aggregate(&self, event: Event) -> Result<(), AnalyticsError> {
        if event.is_watch() {
            self.update_profile(&event)
                .await
                .map_err(AnalyticsError::AggregationError)?;
        }

        let snapshot = self
            .stats
            .apply(&event.video_id, event.action, event.duration);
        self.window.insert(event);

        // The event is fully aggregated at this point. A lost snapshot is
        // superseded by the next one for the same video.
        if let Err(err) = self.store.save_video_stats(snapshot).await {
            counter!(STATS_SNAPSHOT_FAILURES_TOTAL).increment(1);
            warn!("failed to persist video stats snapshot: {}", err);
        }
        Ok(())
    }

    async fn update_profile(&self, event: &Event) -> Result<(), StoreError> {
        let category = self
            .store
            .find_video(&event.video_id)
            .await?
            .map(|video| video.category)
            .unwrap_or_else(|| String::from(UNKNOWN_CATEGORY));

        let _guard = self.profile_locks.lock(&event.user_id).await;
        let mut profile = self.store.get_user_profile(&event.user_id).await?;
        profile.add_watch_event(&event.video_id, &category, self.timesource.current_time());
        self.store.save_user_profile(profile).await
    }

    fn record_processed(&self, quantity: u64) {
        self.counters
            .processed
            .fetch_add(quantity, Ordering::Relaxed);
        counter!(EVENTS_INGESTED_TOTAL).increment(quantity);
    }

    fn record_failed(&self, event_id: &str, err: &AnalyticsError, quantity: u64) {
        self.counters.failed.fetch_add(quantity, Ordering::Relaxed);
        report_dropped_events(err.stage(), quantity);

        if err.is_validation() {
            debug!(event_id, "rejected invalid event: {}", err);
        } else {
            warn!(event_id, stage = err.stage(), "failed to ingest event: {}", err);
        }
    }

    fn report_saturation(&self) {
        let max = self.config.max_concurrent_jobs.get();
        gauge!(ASYNC_JOBS_SATURATION).set(1f64 - self.jobs.available_permits() as f64 / max as f64);
    }
}

enum HandleState {
    Spawned(JoinHandle<EventProcessingResult>),
    Rejected(EventProcessingResult),
}

/// Deferred outcome of a fire-and-forget ingestion.
pub struct IngestHandle {
    event_id: String,
    state: HandleState,
}

impl IngestHandle {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Spawned(inner) => inner.is_finished(),
            HandleState::Rejected(_) => true,
        }
    }

    /// Waits for the ingestion to complete.
    pub async fn result(self) -> EventProcessingResult {
        let inner = match self.state {
            HandleState::Spawned(inner) => inner,
            HandleState::Rejected(result) => return result,
        };

        match inner.await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    event_id = self.event_id.as_str(),
                    "ingestion task failed: {}",
                    err
                );
                EventProcessingResult::failed(
                    self.event_id,
                    &AnalyticsError::WorkerError(err.to_string()),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::{IngestionPipeline, UNKNOWN_CATEGORY};
    use crate::config::PipelineConfig;
    use crate::event::{EventAction, RawEvent, Video};
    use crate::store::{EventStore, MemoryStore};
    use crate::time::FixedTime;

    fn setup() -> (MemoryStore, IngestionPipeline) {
        let clock = Arc::new(FixedTime {
            time: datetime!(2024-03-01 12:00 UTC),
        });
        let store = MemoryStore::new(clock.clone());
        let pipeline =
            IngestionPipeline::new(Arc::new(store.clone()), clock, PipelineConfig::default());
        (store, pipeline)
    }

    fn watch(id: &str, user: &str, video: &str) -> RawEvent {
        RawEvent {
            event_id: Some(id.to_owned()),
            user_id: Some(user.to_owned()),
            video_id: Some(video.to_owned()),
            action: Some(EventAction::Watch),
            duration: Some(90),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn watch_updates_the_profile_with_the_catalog_category() {
        let (store, pipeline) = setup();
        store
            .save_video(Video {
                video_id: String::from("v1"),
                title: String::from("Deep Sea"),
                category: String::from("Documentary"),
                duration: 3600,
                creator: String::from("c1"),
            })
            .await
            .unwrap();

        assert!(pipeline.ingest_one(watch("e1", "u1", "v1")).await.success);
        assert!(pipeline.ingest_one(watch("e2", "u1", "v2")).await.success);

        let profile = store.get_user_profile("u1").await.unwrap();
        assert_eq!(profile.watch_history, vec!["v2", "v1"]);
        assert_eq!(profile.category_preferences.get("Documentary"), Some(&1));
        assert_eq!(profile.category_preferences.get(UNKNOWN_CATEGORY), Some(&1));
    }

    #[tokio::test]
    async fn non_watch_actions_leave_the_profile_alone() {
        let (store, pipeline) = setup();
        let mut like = watch("e1", "u1", "v1");
        like.action = Some(EventAction::Like);

        assert!(pipeline.ingest_one(like).await.success);

        let profile = store.get_user_profile("u1").await.unwrap();
        assert!(profile.watch_history.is_empty());
        assert_eq!(store.video_stats("v1").unwrap().total_likes, 1);
    }

    #[tokio::test]
    async fn stats_snapshots_are_persisted() {
        let (store, pipeline) = setup();
        for i in 0..3 {
            pipeline
                .ingest_one(watch(&format!("e{i}"), "u1", "v1"))
                .await;
        }

        let persisted = store.video_stats("v1").expect("snapshot should be stored");
        assert_eq!(persisted.total_views, 3);
        assert_eq!(persisted, pipeline.stats().get("v1").unwrap());
    }
}
