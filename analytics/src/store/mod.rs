use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::event::{Event, Video};
use crate::profile::UserProfile;
use crate::stats::VideoStats;

pub mod memory;

pub use memory::MemoryStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Durable storage for events and the state derived from them.
///
/// Writes are at-least-once: a caller that sees an error may have had the
/// write land anyway, and nothing in the pipeline retries.
#[async_trait]
pub trait EventStore {
    async fn save(&self, event: Event) -> Result<(), StoreError>;
    async fn save_batch(&self, events: Vec<Event>) -> Result<(), StoreError>;

    /// WATCH events for `video_id` with `start <= timestamp < end`.
    async fn find_events_in_range(
        &self,
        video_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Event>, StoreError>;

    /// Ids of every video with at least one WATCH event in `[start, end)`.
    async fn find_active_videos(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<String>, StoreError>;

    async fn find_video(&self, video_id: &str) -> Result<Option<Video>, StoreError>;
    async fn find_videos_by_category(&self, category: &str) -> Result<Vec<Video>, StoreError>;
    async fn save_video(&self, video: Video) -> Result<(), StoreError>;

    /// Stores a stats snapshot, unless a newer one for the same video is already stored.
    async fn save_video_stats(&self, stats: VideoStats) -> Result<(), StoreError>;
    /// Stats ordered by `total_views` descending.
    async fn get_top_videos(&self, limit: usize) -> Result<Vec<VideoStats>, StoreError>;

    /// Returns the stored profile, creating an empty one on first access.
    async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, StoreError>;
    async fn save_user_profile(&self, profile: UserProfile) -> Result<(), StoreError>;
}
