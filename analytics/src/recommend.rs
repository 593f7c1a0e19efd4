use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::api::AnalyticsError;
use crate::profile::ProfileLocks;
use crate::store::EventStore;
use crate::time::TimeSource;

/// Share of the list, rounded up, reserved for the user's favourite category.
/// Computed as `ceil(limit * 3 / 5)` without overflowing.
pub fn category_quota(limit: usize) -> usize {
    limit / 5 * 3 + (limit % 5 * 3).div_ceil(5)
}

pub struct RecommendationRanker {
    store: Arc<dyn EventStore + Send + Sync>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    profile_locks: Arc<ProfileLocks>,
}

impl RecommendationRanker {
    /// `profile_locks` must be the set the ingestion pipeline uses, so that a
    /// WATCH landing while a list is computed is not overwritten.
    pub fn new(
        store: Arc<dyn EventStore + Send + Sync>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        profile_locks: Arc<ProfileLocks>,
    ) -> Self {
        Self {
            store,
            timesource,
            profile_locks,
        }
    }

    /// Ranks up to `limit` unwatched videos for a user and stores the list on
    /// their profile. Favourite-category videos come first, in catalog order,
    /// then the most viewed videos overall.
    #[instrument(skip(self))]
    pub async fn recommend(&self, user_id: &str, limit: usize) -> Result<Vec<String>, AnalyticsError> {
        let _guard = self.profile_locks.lock(user_id).await;
        let mut profile = self.store.get_user_profile(user_id).await?;
        let watched: HashSet<&str> = profile.watch_history.iter().map(String::as_str).collect();

        let mut selected: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(category) = profile.top_category() {
            let quota = category_quota(limit);
            for video in self.store.find_videos_by_category(category).await? {
                if selected.len() >= quota {
                    break;
                }
                if watched.contains(video.video_id.as_str()) || !seen.insert(video.video_id.clone())
                {
                    continue;
                }
                selected.push(video.video_id);
            }
            debug!(category, from_category = selected.len(), "selected category videos");
        }

        if selected.len() < limit {
            // Over-fetch so that skipped entries cannot starve the fill.
            let wanted = limit.saturating_add(watched.len());
            for stats in self.store.get_top_videos(wanted).await? {
                if selected.len() >= limit {
                    break;
                }
                if watched.contains(stats.video_id.as_str()) || !seen.insert(stats.video_id.clone())
                {
                    continue;
                }
                selected.push(stats.video_id);
            }
        }

        profile.update_recommendations(selected.clone(), self.timesource.current_time());
        self.store.save_user_profile(profile).await?;

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::category_quota;

    #[test]
    fn category_quota_rounds_up() {
        assert_eq!(category_quota(0), 0);
        assert_eq!(category_quota(1), 1);
        assert_eq!(category_quota(5), 3);
        assert_eq!(category_quota(10), 6);
        assert_eq!(category_quota(11), 7);
    }

    #[test]
    fn category_quota_does_not_overflow() {
        assert_eq!(category_quota(1_000_000_005), 600_000_003);
        assert_eq!(category_quota(usize::MAX), usize::MAX / 5 * 3);
    }
}
