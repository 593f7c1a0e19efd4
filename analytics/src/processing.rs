use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::instrument;

use crate::api::AnalyticsError;
use crate::event::{Event, EventAction, RawEvent};

pub const DEFAULT_DEVICE_TYPE: &str = "unknown";
pub const DEFAULT_QUALITY: &str = "auto";

/// A raw event that passed validation, with its fields parsed but optional
/// ones still unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEvent {
    pub event_id: String,
    pub user_id: String,
    pub video_id: String,
    pub timestamp: Option<OffsetDateTime>,
    pub action: Option<EventAction>,
    pub duration: u32,
    pub quality: Option<String>,
    pub device_type: Option<String>,
}

fn required(value: &Option<String>, err: AnalyticsError) -> Result<String, AnalyticsError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(err),
    }
}

/// Rejects structurally invalid events. Has no side effects.
///
/// An absent timestamp is accepted and filled in by [`enrich`]; one that is
/// present must be a non-blank RFC 3339 instant.
pub fn validate(event: &RawEvent) -> Result<ValidatedEvent, AnalyticsError> {
    let event_id = required(&event.event_id, AnalyticsError::MissingEventId)?;
    let user_id = required(&event.user_id, AnalyticsError::MissingUserId)?;
    let video_id = required(&event.video_id, AnalyticsError::MissingVideoId)?;

    let timestamp = match &event.timestamp {
        None => None,
        Some(raw) => Some(
            OffsetDateTime::parse(raw.trim(), &Rfc3339)
                .map_err(|_| AnalyticsError::InvalidTimestamp(raw.clone()))?,
        ),
    };

    let duration = match event.duration {
        None => 0,
        Some(d) if d < 0 => return Err(AnalyticsError::NegativeDuration(d)),
        Some(d) => u32::try_from(d).map_err(|_| AnalyticsError::DurationOutOfRange(d))?,
    };

    Ok(ValidatedEvent {
        event_id,
        user_id,
        video_id,
        timestamp,
        action: event.action,
        duration,
        quality: event.quality.clone(),
        device_type: event.device_type.clone(),
    })
}

/// Fills unset optional fields with their defaults. Present values are kept.
pub fn enrich(event: ValidatedEvent, now: OffsetDateTime) -> Event {
    Event {
        event_id: event.event_id,
        user_id: event.user_id,
        video_id: event.video_id,
        timestamp: event.timestamp.unwrap_or(now),
        action: event.action.unwrap_or_default(),
        duration: event.duration,
        quality: event
            .quality
            .unwrap_or_else(|| String::from(DEFAULT_QUALITY)),
        device_type: event
            .device_type
            .unwrap_or_else(|| String::from(DEFAULT_DEVICE_TYPE)),
    }
}

#[instrument(skip_all)]
pub fn process_single_event(
    event: &RawEvent,
    now: OffsetDateTime,
) -> Result<Event, AnalyticsError> {
    Ok(enrich(validate(event)?, now))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{enrich, process_single_event, validate};
    use crate::api::AnalyticsError;
    use crate::event::{EventAction, RawEvent};

    fn raw() -> RawEvent {
        RawEvent {
            event_id: Some(String::from("evt-1")),
            user_id: Some(String::from("user-1")),
            video_id: Some(String::from("video-1")),
            timestamp: Some(String::from("2024-03-01T10:00:00Z")),
            action: Some(EventAction::Like),
            duration: Some(30),
            quality: Some(String::from("720p")),
            device_type: Some(String::from("tv")),
        }
    }

    #[test]
    fn accepts_a_complete_event() {
        let validated = validate(&raw()).expect("event should be valid");
        assert_eq!(validated.timestamp, Some(datetime!(2024-03-01 10:00 UTC)));
        assert_eq!(validated.duration, 30);
    }

    #[test]
    fn rejects_missing_identifiers() {
        let mut event = raw();
        event.event_id = Some(String::new());
        assert!(matches!(validate(&event), Err(AnalyticsError::MissingEventId)));

        let mut event = raw();
        event.user_id = None;
        assert!(matches!(validate(&event), Err(AnalyticsError::MissingUserId)));

        let mut event = raw();
        event.video_id = Some(String::from("   "));
        assert!(matches!(validate(&event), Err(AnalyticsError::MissingVideoId)));
    }

    #[test]
    fn rejects_bad_timestamps() {
        let mut event = raw();
        event.timestamp = Some(String::from("yesterday"));
        assert!(matches!(
            validate(&event),
            Err(AnalyticsError::InvalidTimestamp(ts)) if ts == "yesterday"
        ));

        event.timestamp = Some(String::new());
        assert!(matches!(
            validate(&event),
            Err(AnalyticsError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn rejects_negative_and_oversized_durations() {
        let mut event = raw();
        event.duration = Some(-1);
        assert!(matches!(
            validate(&event),
            Err(AnalyticsError::NegativeDuration(-1))
        ));

        event.duration = Some(i64::from(u32::MAX) + 1);
        assert!(matches!(
            validate(&event),
            Err(AnalyticsError::DurationOutOfRange(_))
        ));
    }

    #[test]
    fn enrich_fills_defaults() {
        let now = datetime!(2024-03-02 08:30 UTC);
        let event = RawEvent {
            event_id: Some(String::from("evt-2")),
            user_id: Some(String::from("user-2")),
            video_id: Some(String::from("video-2")),
            ..Default::default()
        };

        let event = process_single_event(&event, now).expect("event should be valid");
        assert_eq!(event.timestamp, now);
        assert_eq!(event.action, EventAction::Watch);
        assert_eq!(event.duration, 0);
        assert_eq!(event.quality, "auto");
        assert_eq!(event.device_type, "unknown");
    }

    #[test]
    fn enrich_keeps_present_values() {
        let now = datetime!(2024-03-02 08:30 UTC);
        let event = enrich(validate(&raw()).unwrap(), now);

        assert_eq!(event.timestamp, datetime!(2024-03-01 10:00 UTC));
        assert_eq!(event.action, EventAction::Like);
        assert_eq!(event.quality, "720p");
        assert_eq!(event.device_type, "tv");
    }
}
