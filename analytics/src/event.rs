use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::api::AnalyticsError;

/// What a user did to a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventAction {
    #[default]
    #[serde(alias = "watch")]
    Watch,
    #[serde(alias = "pause")]
    Pause,
    #[serde(alias = "like")]
    Like,
    #[serde(alias = "share")]
    Share,
    #[serde(alias = "comment")]
    Comment,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Watch => "WATCH",
            EventAction::Pause => "PAUSE",
            EventAction::Like => "LIKE",
            EventAction::Share => "SHARE",
            EventAction::Comment => "COMMENT",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event as submitted by a producer. Every field is optional at this
/// stage: validation decides what is acceptable, enrichment fills the rest.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub video_id: Option<String>,
    pub timestamp: Option<String>,
    pub action: Option<EventAction>,
    pub duration: Option<i64>,
    pub quality: Option<String>,
    pub device_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRequest {
    /// Batch of events
    Batch(Vec<RawEvent>),
    /// Single event
    One(Box<RawEvent>),
}

impl RawRequest {
    pub fn events(self) -> Vec<RawEvent> {
        match self {
            RawRequest::Batch(events) => events,
            RawRequest::One(event) => vec![*event],
        }
    }
}

impl RawEvent {
    /// A payload holds either one event object or an array of them, so
    /// decoding always returns a Vec.
    pub fn from_bytes(bytes: &[u8]) -> Result<Vec<RawEvent>, AnalyticsError> {
        tracing::debug!(len = bytes.len(), "decoding new event payload");

        let payload = std::str::from_utf8(bytes).map_err(|e| {
            tracing::error!("failed to decode body: {}", e);
            AnalyticsError::RequestDecodingError(String::from("invalid body encoding"))
        })?;

        Ok(serde_json::from_str::<RawRequest>(payload)?.events())
    }

    /// Best-effort identifier used for reporting, even when the event is invalid.
    pub fn reported_id(&self) -> String {
        self.event_id.clone().unwrap_or_default()
    }
}

/// A validated, enriched event. Never mutated once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub user_id: String,
    pub video_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub action: EventAction,
    pub duration: u32,
    pub quality: String,
    pub device_type: String,
}

impl Event {
    pub fn is_watch(&self) -> bool {
        self.action == EventAction::Watch
    }
}

/// Catalog metadata for a video.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub video_id: String,
    pub title: String,
    pub category: String,
    pub duration: u32,
    pub creator: String,
}
