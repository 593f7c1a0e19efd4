//! Per-video running aggregates.
//!
//! Stats live in a sharded map: an update holds the write lock of the shard
//! owning its key, so updates to one video are serialized while videos on
//! other shards proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::event::EventAction;
use crate::time::TimeSource;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStats {
    pub video_id: String,
    pub total_views: u64,
    /// Running mean of WATCH durations, in seconds.
    pub avg_duration: f64,
    pub total_likes: u64,
    pub total_shares: u64,
    pub total_comments: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    /// Number of actions folded in so far, PAUSE included. Orders snapshots
    /// of the same video.
    pub events_applied: u64,
}

impl VideoStats {
    pub fn new(video_id: &str, now: OffsetDateTime) -> Self {
        Self {
            video_id: video_id.to_owned(),
            total_views: 0,
            avg_duration: 0.0,
            total_likes: 0,
            total_shares: 0,
            total_comments: 0,
            last_updated: now,
            events_applied: 0,
        }
    }

    /// Folds one action in. The mean is updated from its previous value and
    /// never recomputed from a stored sum, so results round the same way on
    /// every replay.
    pub fn apply(&mut self, action: EventAction, duration: u32, now: OffsetDateTime) {
        match action {
            EventAction::Watch => {
                self.total_views += 1;
                self.avg_duration = (self.avg_duration * (self.total_views - 1) as f64
                    + f64::from(duration))
                    / self.total_views as f64;
            }
            EventAction::Like => self.total_likes += 1,
            EventAction::Share => self.total_shares += 1,
            EventAction::Comment => self.total_comments += 1,
            EventAction::Pause => {}
        }
        self.events_applied += 1;
        self.last_updated = now;
    }
}

pub struct StatsAccumulator {
    stats: DashMap<String, VideoStats>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl StatsAccumulator {
    pub fn new(timesource: Arc<dyn TimeSource + Send + Sync>) -> Self {
        Self {
            stats: DashMap::new(),
            timesource,
        }
    }

    /// Applies an action to a video's stats, creating them on first sight,
    /// and returns the post-update snapshot.
    pub fn apply(&self, video_id: &str, action: EventAction, duration: u32) -> VideoStats {
        let now = self.timesource.current_time();
        let mut entry = self
            .stats
            .entry(video_id.to_owned())
            .or_insert_with(|| VideoStats::new(video_id, now));
        entry.apply(action, duration, now);
        entry.clone()
    }

    pub fn get(&self, video_id: &str) -> Option<VideoStats> {
        self.stats.get(video_id).map(|stats| stats.clone())
    }

    /// Most viewed videos first, ties broken by video id.
    pub fn top_videos(&self, limit: usize) -> Vec<VideoStats> {
        let mut all: Vec<VideoStats> = self.stats.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| {
            b.total_views
                .cmp(&a.total_views)
                .then_with(|| a.video_id.cmp(&b.video_id))
        });
        all.truncate(limit);
        all
    }

    /// Mean WATCH duration across every video, weighted by views. Zero
    /// before the first WATCH.
    pub fn average_watch_time(&self) -> f64 {
        let (views, seconds) = self.stats.iter().fold((0u64, 0f64), |(views, seconds), s| {
            (
                views + s.total_views,
                seconds + s.avg_duration * s.total_views as f64,
            )
        });
        if views == 0 {
            0.0
        } else {
            seconds / views as f64
        }
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
