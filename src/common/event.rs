use crate::error::EventParseError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const UNKNOWN_CAMERA: &str = "unknown_camera";
const UNKNOWN_LABEL: &str = "unknown_label";

/// Which notification of a physical event this is. The recorder emits the
/// same id several times while an object stays in view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionKind {
    New,
    Update,
    End,
}

impl RevisionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" => Some(RevisionKind::New),
            "update" => Some(RevisionKind::Update),
            "end" => Some(RevisionKind::End),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RevisionKind::New => "new",
            RevisionKind::Update => "update",
            RevisionKind::End => "end",
        }
    }
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One notification from the recorder's event bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: String,
    pub camera: String,
    pub label: String,
    /// Seconds since the Unix epoch, fractional.
    pub start_time: f64,
    pub revision: RevisionKind,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        camera: impl Into<String>,
        label: impl Into<String>,
        revision: RevisionKind,
    ) -> Self {
        Self {
            id: id.into(),
            camera: camera.into(),
            label: label.into(),
            start_time: 0.0,
            revision,
        }
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    /// The same physical event as seen in a later notification.
    pub fn revised(&self, revision: RevisionKind) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        if !self.start_time.is_finite() {
            return None;
        }
        let millis = (self.start_time * 1000.0).round() as i64;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Parses a Frigate `events` message:
    /// `{"type": "new"|"update"|"end", "before": {..}, "after": {"id", "camera", "label", "start_time"}}`.
    pub fn from_frigate_json(payload: &[u8]) -> Result<Self, EventParseError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| EventParseError::NotJson(e.to_string()))?;
        if !value.is_object() {
            return Err(EventParseError::NotAnObject);
        }
        let message: FrigateMessage = serde_json::from_value(value)
            .map_err(|e| EventParseError::NotJson(e.to_string()))?;

        let revision = message
            .kind
            .as_deref()
            .and_then(RevisionKind::parse)
            .ok_or_else(|| EventParseError::UnknownRevision(message.kind.clone()))?;
        let details = message.after.ok_or(EventParseError::MissingDetails)?;
        let id = details
            .id
            .filter(|id| !id.is_empty())
            .ok_or(EventParseError::MissingId)?;

        Ok(Self {
            id,
            camera: details.camera.unwrap_or_else(|| UNKNOWN_CAMERA.to_string()),
            label: details.label.unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            start_time: details.start_time.unwrap_or(0.0),
            revision,
        })
    }
}

#[derive(Deserialize)]
struct FrigateMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    after: Option<FrigateEventDetails>,
}

#[derive(Deserialize)]
struct FrigateEventDetails {
    id: Option<String>,
    camera: Option<String>,
    label: Option<String>,
    start_time: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frigate_end_message() {
        let payload = br#"{
            "type": "end",
            "before": {"id": "1718.123-abc"},
            "after": {"id": "1718.123-abc", "camera": "Tuin", "label": "bird", "start_time": 1718000000.25, "score": 0.8}
        }"#;
        let event = Event::from_frigate_json(payload).unwrap();
        assert_eq!(event.id, "1718.123-abc");
        assert_eq!(event.camera, "Tuin");
        assert_eq!(event.label, "bird");
        assert_eq!(event.revision, RevisionKind::End);
        assert_eq!(
            event.started_at().unwrap().timestamp_millis(),
            1_718_000_000_250
        );
    }

    #[test]
    fn revision_type_is_case_insensitive() {
        let payload = br#"{"type": "Update", "after": {"id": "e1", "camera": "c", "label": "l"}}"#;
        let event = Event::from_frigate_json(payload).unwrap();
        assert_eq!(event.revision, RevisionKind::Update);
    }

    #[test]
    fn missing_camera_and_label_fall_back_to_placeholders() {
        let payload = br#"{"type": "new", "after": {"id": "e1"}}"#;
        let event = Event::from_frigate_json(payload).unwrap();
        assert_eq!(event.camera, "unknown_camera");
        assert_eq!(event.label, "unknown_label");
    }

    #[test]
    fn rejects_messages_that_are_not_events() {
        assert!(matches!(
            Event::from_frigate_json(b"not json"),
            Err(EventParseError::NotJson(_))
        ));
        assert_eq!(
            Event::from_frigate_json(b"[1, 2]"),
            Err(EventParseError::NotAnObject)
        );
        assert_eq!(
            Event::from_frigate_json(br#"{"type": "snapshot", "after": {"id": "e1"}}"#),
            Err(EventParseError::UnknownRevision(Some("snapshot".to_string())))
        );
        assert_eq!(
            Event::from_frigate_json(br#"{"type": "new"}"#),
            Err(EventParseError::MissingDetails)
        );
        assert_eq!(
            Event::from_frigate_json(br#"{"type": "new", "after": {"id": ""}}"#),
            Err(EventParseError::MissingId)
        );
    }

    #[test]
    fn revised_keeps_identity() {
        let event = Event::new("e1", "Tuin", "bird", RevisionKind::New);
        let end = event.revised(RevisionKind::End);
        assert_eq!(end.id, event.id);
        assert_eq!(end.revision, RevisionKind::End);
    }
}
