use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::event::{Event, Video};
use crate::profile::UserProfile;
use crate::stats::VideoStats;
use crate::store::{EventStore, StoreError};
use crate::time::TimeSource;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process store keeping everything in memory. Cloning shares the data.
#[derive(Clone)]
pub struct MemoryStore {
    events: Arc<Mutex<Vec<Event>>>,
    // Kept in insertion order: category listings follow it.
    videos: Arc<Mutex<Vec<Video>>>,
    stats: Arc<Mutex<HashMap<String, VideoStats>>>,
    profiles: Arc<Mutex<HashMap<String, UserProfile>>>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl MemoryStore {
    pub fn new(timesource: Arc<dyn TimeSource + Send + Sync>) -> Self {
        Self {
            events: Arc::default(),
            videos: Arc::default(),
            stats: Arc::default(),
            profiles: Arc::default(),
            timesource,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn video_stats(&self, video_id: &str) -> Option<VideoStats> {
        lock(&self.stats).get(video_id).cloned()
    }

    fn watches_in_range<'a>(
        events: &'a [Event],
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> impl Iterator<Item = &'a Event> {
        events
            .iter()
            .filter(move |e| e.is_watch() && e.timestamp >= start && e.timestamp < end)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn save(&self, event: Event) -> Result<(), StoreError> {
        lock(&self.events).push(event);
        Ok(())
    }

    async fn save_batch(&self, events: Vec<Event>) -> Result<(), StoreError> {
        lock(&self.events).extend(events);
        Ok(())
    }

    async fn find_events_in_range(
        &self,
        video_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Event>, StoreError> {
        let events = lock(&self.events);
        let found: Vec<Event> = Self::watches_in_range(&events, start, end)
            .filter(|e| e.video_id == video_id)
            .cloned()
            .collect();
        Ok(found)
    }

    async fn find_active_videos(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<String>, StoreError> {
        let events = lock(&self.events);
        let mut videos: Vec<String> = Self::watches_in_range(&events, start, end)
            .map(|e| e.video_id.clone())
            .collect();
        videos.sort_unstable();
        videos.dedup();
        Ok(videos)
    }

    async fn find_video(&self, video_id: &str) -> Result<Option<Video>, StoreError> {
        let video = lock(&self.videos)
            .iter()
            .find(|v| v.video_id == video_id)
            .cloned();
        Ok(video)
    }

    async fn find_videos_by_category(&self, category: &str) -> Result<Vec<Video>, StoreError> {
        let videos: Vec<Video> = lock(&self.videos)
            .iter()
            .filter(|v| v.category == category)
            .cloned()
            .collect();
        Ok(videos)
    }

    async fn save_video(&self, video: Video) -> Result<(), StoreError> {
        let mut videos = lock(&self.videos);
        match videos.iter().position(|v| v.video_id == video.video_id) {
            Some(index) => videos[index] = video,
            None => videos.push(video),
        }
        Ok(())
    }

    async fn save_video_stats(&self, stats: VideoStats) -> Result<(), StoreError> {
        let mut all = lock(&self.stats);
        let stale = all
            .get(&stats.video_id)
            .is_some_and(|stored| stored.events_applied >= stats.events_applied);
        if !stale {
            all.insert(stats.video_id.clone(), stats);
        }
        Ok(())
    }

    async fn get_top_videos(&self, limit: usize) -> Result<Vec<VideoStats>, StoreError> {
        let mut top: Vec<VideoStats> = lock(&self.stats).values().cloned().collect();
        top.sort_by(|a, b| {
            b.total_views
                .cmp(&a.total_views)
                .then_with(|| a.video_id.cmp(&b.video_id))
        });
        top.truncate(limit);
        Ok(top)
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        let now = self.timesource.current_time();
        let profile = lock(&self.profiles)
            .entry(user_id.to_owned())
            .or_insert_with(|| UserProfile::new(user_id, now))
            .clone();
        Ok(profile)
    }

    async fn save_user_profile(&self, profile: UserProfile) -> Result<(), StoreError> {
        lock(&self.profiles).insert(profile.user_id.clone(), profile);
        Ok(())
    }
}
