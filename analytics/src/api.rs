use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("event submitted without an eventId")]
    MissingEventId,
    #[error("event submitted without a userId")]
    MissingUserId,
    #[error("event submitted without a videoId")]
    MissingVideoId,
    #[error("event submitted with an invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("event submitted with a negative duration: {0}")]
    NegativeDuration(i64),
    #[error("event duration is out of range: {0}")]
    DurationOutOfRange(i64),

    #[error("failed to persist event: {0}")]
    PersistenceError(StoreError),
    #[error("event persisted but aggregation failed: {0}")]
    AggregationError(StoreError),
    #[error("store query failed: {0}")]
    QueryError(#[from] StoreError),

    #[error("ingestion task did not complete: {0}")]
    WorkerError(String),
}

impl AnalyticsError {
    /// Validation failures are rejected before anything is written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AnalyticsError::MissingEventId
                | AnalyticsError::MissingUserId
                | AnalyticsError::MissingVideoId
                | AnalyticsError::InvalidTimestamp(_)
                | AnalyticsError::NegativeDuration(_)
                | AnalyticsError::DurationOutOfRange(_)
        )
    }

    /// Pipeline stage the error was raised in, used as a metric label.
    pub fn stage(&self) -> &'static str {
        match self {
            AnalyticsError::RequestDecodingError(_) | AnalyticsError::RequestParsingError(_) => {
                "decoding"
            }
            AnalyticsError::PersistenceError(_) => "persistence",
            AnalyticsError::AggregationError(_) => "aggregation",
            AnalyticsError::QueryError(_) => "query",
            AnalyticsError::WorkerError(_) => "worker",
            _ => "validation",
        }
    }
}

/// Outcome of ingesting one event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventProcessingResult {
    pub event_id: String,
    pub success: bool,
    pub message: String,
}

impl EventProcessingResult {
    pub fn accepted(event_id: String) -> Self {
        Self {
            event_id,
            success: true,
            message: String::from("event processed"),
        }
    }

    pub fn failed(event_id: String, err: &AnalyticsError) -> Self {
        Self {
            event_id,
            success: false,
            message: err.to_string(),
        }
    }
}

/// Outcome of ingesting a batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProcessingResult {
    pub processed_count: u64,
    pub failed_count: u64,
    pub message: String,
}

/// Process-wide ingestion counters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub processed_count: u64,
    pub failed_count: u64,
    pub success_rate: f64,
}

impl ProcessingStats {
    pub fn new(processed_count: u64, failed_count: u64) -> Self {
        let total = processed_count + failed_count;
        let success_rate = if total == 0 {
            100.0
        } else {
            processed_count as f64 / total as f64 * 100.0
        };

        Self {
            processed_count,
            failed_count,
            success_rate,
        }
    }
}

/// Live summary of what the pipeline has seen, built from in-memory state.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeStats {
    pub total_events_processed: u64,
    /// Distinct users among the recent events.
    pub active_users: usize,
    /// Distinct users with a WATCH among the recent events.
    pub current_viewers: usize,
    /// View-weighted mean WATCH duration, in seconds.
    pub average_watch_time: f64,
    pub most_watched_video_id: Option<String>,
    pub top_video_ids: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}
