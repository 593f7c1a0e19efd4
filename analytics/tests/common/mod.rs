#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use analytics::config::PipelineConfig;
use analytics::event::{Event, EventAction, RawEvent, Video};
use analytics::pipeline::IngestionPipeline;
use analytics::profile::UserProfile;
use analytics::recommend::RecommendationRanker;
use analytics::stats::VideoStats;
use analytics::store::{EventStore, MemoryStore, StoreError};
use analytics::time::FixedTime;

pub const NOW: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

pub static DEFAULT_CONFIG: Lazy<PipelineConfig> = Lazy::new(|| PipelineConfig {
    batch_size: NonZeroUsize::new(4).unwrap(),
    window_capacity: 1000,
    max_concurrent_jobs: NonZeroUsize::new(8).unwrap(),
});

pub fn clock() -> Arc<FixedTime> {
    Arc::new(FixedTime { time: NOW })
}

/// Wraps a `MemoryStore`, counting writes and failing on demand.
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_saves: Arc<AtomicBool>,
    pub fail_profiles: Arc<AtomicBool>,
    pub fail_stats_snapshots: Arc<AtomicBool>,
    // Delays `get_top_videos`, holding a recommendation mid-computation.
    pub slow_top_videos: Arc<AtomicBool>,
    pub save_calls: Arc<AtomicUsize>,
    pub batch_calls: Arc<AtomicUsize>,
    // Fails this many upcoming `save_batch` calls.
    pub failing_batches: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(clock()),
            fail_saves: Arc::default(),
            fail_profiles: Arc::default(),
            fail_stats_snapshots: Arc::default(),
            slow_top_videos: Arc::default(),
            save_calls: Arc::default(),
            batch_calls: Arc::default(),
            failing_batches: Arc::default(),
        }
    }

    pub fn pipeline(&self) -> IngestionPipeline {
        self.pipeline_with(DEFAULT_CONFIG.clone())
    }

    pub fn pipeline_with(&self, config: PipelineConfig) -> IngestionPipeline {
        IngestionPipeline::new(Arc::new(self.clone()), clock(), config)
    }

    pub fn ranker(&self, pipeline: &IngestionPipeline) -> RecommendationRanker {
        RecommendationRanker::new(
            Arc::new(self.clone()),
            clock(),
            pipeline.profile_locks().clone(),
        )
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(String::from("injected failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn save(&self, event: Event) -> Result<(), StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_saves)?;
        self.inner.save(event).await
    }

    async fn save_batch(&self, events: Vec<Event>) -> Result<(), StoreError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Rejected(String::from("injected batch failure")));
        }
        Self::check(&self.fail_saves)?;
        self.inner.save_batch(events).await
    }

    async fn find_events_in_range(
        &self,
        video_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Event>, StoreError> {
        self.inner.find_events_in_range(video_id, start, end).await
    }

    async fn find_active_videos(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.find_active_videos(start, end).await
    }

    async fn find_video(&self, video_id: &str) -> Result<Option<Video>, StoreError> {
        self.inner.find_video(video_id).await
    }

    async fn find_videos_by_category(&self, category: &str) -> Result<Vec<Video>, StoreError> {
        self.inner.find_videos_by_category(category).await
    }

    async fn save_video(&self, video: Video) -> Result<(), StoreError> {
        self.inner.save_video(video).await
    }

    async fn save_video_stats(&self, stats: VideoStats) -> Result<(), StoreError> {
        Self::check(&self.fail_stats_snapshots)?;
        self.inner.save_video_stats(stats).await
    }

    async fn get_top_videos(&self, limit: usize) -> Result<Vec<VideoStats>, StoreError> {
        if self.slow_top_videos.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        self.inner.get_top_videos(limit).await
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        Self::check(&self.fail_profiles)?;
        self.inner.get_user_profile(user_id).await
    }

    async fn save_user_profile(&self, profile: UserProfile) -> Result<(), StoreError> {
        Self::check(&self.fail_profiles)?;
        self.inner.save_user_profile(profile).await
    }
}

pub fn raw_watch(user: &str, video: &str, duration: i64) -> RawEvent {
    RawEvent {
        event_id: Some(Uuid::now_v7().to_string()),
        user_id: Some(user.to_owned()),
        video_id: Some(video.to_owned()),
        action: Some(EventAction::Watch),
        duration: Some(duration),
        ..Default::default()
    }
}

pub fn watch_at(video: &str, at: OffsetDateTime) -> Event {
    Event {
        event_id: Uuid::now_v7().to_string(),
        user_id: String::from("viewer"),
        video_id: video.to_owned(),
        timestamp: at,
        action: EventAction::Watch,
        duration: 60,
        quality: String::from("auto"),
        device_type: String::from("unknown"),
    }
}

/// `count` WATCH events spread over the hour before `NOW - days_ago`.
pub fn watches(video: &str, count: usize, days_ago: i64) -> Vec<Event> {
    (0..count)
        .map(|i| {
            let at = NOW - Duration::days(days_ago) - Duration::minutes(1 + i as i64 % 59);
            watch_at(video, at)
        })
        .collect()
}

pub fn video(id: &str, category: &str) -> Video {
    Video {
        video_id: id.to_owned(),
        title: format!("Video {id}"),
        category: category.to_owned(),
        duration: 600,
        creator: String::from("creator"),
    }
}
