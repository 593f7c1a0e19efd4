use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::{debug, instrument};

use crate::api::AnalyticsError;
use crate::store::EventStore;
use crate::time::TimeSource;

/// A video qualifies only when it grew strictly faster than this factor.
pub const GROWTH_THRESHOLD: f64 = 1.5;
/// A video qualifies only with strictly more recent views than this.
pub const MIN_RECENT_VIEWS: u64 = 10;

const RECENT_WINDOW: Duration = Duration::days(1);
const BASELINE_WINDOW: Duration = Duration::days(7);
// The baseline is the six days preceding the recent window.
const BASELINE_DAYS: f64 = 6.0;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingVideo {
    pub rank: usize,
    pub video_id: String,
    pub recent_views: u64,
    pub baseline_views: u64,
    pub growth_rate: f64,
}

/// Watch growth over the last day compared with the preceding six days.
pub fn growth_rate(recent_views: u64, baseline_views: u64) -> f64 {
    let daily_baseline = (baseline_views as f64 / BASELINE_DAYS).max(1.0);
    recent_views as f64 / daily_baseline
}

pub fn qualifies(recent_views: u64, growth_rate: f64) -> bool {
    growth_rate > GROWTH_THRESHOLD && recent_views > MIN_RECENT_VIEWS
}

fn by_trend(a: &TrendingVideo, b: &TrendingVideo) -> Ordering {
    b.growth_rate
        .total_cmp(&a.growth_rate)
        .then_with(|| b.recent_views.cmp(&a.recent_views))
        .then_with(|| a.video_id.cmp(&b.video_id))
}

pub struct TrendDetector {
    store: Arc<dyn EventStore + Send + Sync>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl TrendDetector {
    pub fn new(
        store: Arc<dyn EventStore + Send + Sync>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
    ) -> Self {
        Self { store, timesource }
    }

    /// Scores every video watched during the last day and returns the top
    /// `limit` qualifying ones, ranked from 1.
    #[instrument(skip(self))]
    pub async fn detect_trending(&self, limit: usize) -> Result<Vec<TrendingVideo>, AnalyticsError> {
        let now = self.timesource.current_time();
        let recent_start = now - RECENT_WINDOW;
        let baseline_start = now - BASELINE_WINDOW;

        let candidates = self.store.find_active_videos(recent_start, now).await?;
        let mut trending = Vec::new();

        for video_id in candidates {
            let events = self
                .store
                .find_events_in_range(&video_id, baseline_start, now)
                .await?;
            let recent_views = events
                .iter()
                .filter(|e| e.timestamp >= recent_start)
                .count() as u64;
            let baseline_views = events.len() as u64 - recent_views;

            let rate = growth_rate(recent_views, baseline_views);
            if !qualifies(recent_views, rate) {
                debug!(
                    video_id = video_id.as_str(),
                    recent_views,
                    baseline_views,
                    growth_rate = rate,
                    "not trending"
                );
                continue;
            }

            trending.push(TrendingVideo {
                rank: 0,
                video_id,
                recent_views,
                baseline_views,
                growth_rate: rate,
            });
        }

        trending.sort_by(by_trend);
        trending.truncate(limit);
        for (index, video) in trending.iter_mut().enumerate() {
            video.rank = index + 1;
        }

        debug!(trending = trending.len(), "detected trending videos");
        Ok(trending)
    }
}
