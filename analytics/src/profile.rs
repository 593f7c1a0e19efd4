use std::collections::hash_map::RandomState;
use std::collections::BTreeMap;
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};

/// How many watched videos a profile remembers.
pub const WATCH_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    /// Most recent first, no duplicates.
    pub watch_history: Vec<String>,
    /// Category -> number of WATCH events. Ordered so that iteration, and
    /// therefore top-category selection, is stable.
    pub category_preferences: BTreeMap<String, u64>,
    pub recommended_videos: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl UserProfile {
    pub fn new(user_id: &str, now: OffsetDateTime) -> Self {
        Self {
            user_id: user_id.to_owned(),
            watch_history: Vec::new(),
            category_preferences: BTreeMap::new(),
            recommended_videos: Vec::new(),
            last_updated: now,
        }
    }

    /// Records a WATCH. A video already in the history keeps its position;
    /// the category count goes up either way.
    pub fn add_watch_event(&mut self, video_id: &str, category: &str, now: OffsetDateTime) {
        if !self.has_watched(video_id) {
            self.watch_history.insert(0, video_id.to_owned());
            self.watch_history.truncate(WATCH_HISTORY_LIMIT);
        }

        *self
            .category_preferences
            .entry(category.to_owned())
            .or_insert(0) += 1;
        self.last_updated = now;
    }

    pub fn update_recommendations(&mut self, videos: Vec<String>, now: OffsetDateTime) {
        self.recommended_videos = videos;
        self.last_updated = now;
    }

    pub fn has_watched(&self, video_id: &str) -> bool {
        self.watch_history.iter().any(|v| v == video_id)
    }

    /// Category with the highest watch count. On a tie the lexicographically
    /// smallest category wins.
    pub fn top_category(&self) -> Option<&str> {
        let mut top: Option<(&str, u64)> = None;
        for (category, count) in &self.category_preferences {
            match top {
                Some((_, best)) if *count <= best => {}
                _ => top = Some((category.as_str(), *count)),
            }
        }
        top.map(|(category, _)| category)
    }
}

const PROFILE_LOCK_STRIPES: usize = 64;

/// Serializes profile read-modify-write cycles per user. Every component that
/// loads a profile and saves it back must hold the user's guard in between.
/// Users hash onto a fixed set of stripes, so memory stays bounded however
/// many users exist.
pub struct ProfileLocks {
    stripes: Vec<Mutex<()>>,
    hasher: RandomState,
}

impl ProfileLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..PROFILE_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub async fn lock(&self, user_id: &str) -> MutexGuard<'_, ()> {
        let stripe = self.hasher.hash_one(user_id) as usize % self.stripes.len();
        self.stripes[stripe].lock().await
    }
}

impl Default for ProfileLocks {
    fn default() -> Self {
        Self::new()
    }
}
