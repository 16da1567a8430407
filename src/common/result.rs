use crate::common::event::Event;
use crate::error::AnalysisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the inference service concluded about a set of frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub detected: bool,
    pub probability: f64,
}

impl Verdict {
    /// Probabilities outside [0, 1] are clamped; NaN and infinities are rejected.
    pub fn new(detected: bool, probability: f64) -> Result<Self, AnalysisError> {
        if !probability.is_finite() {
            return Err(AnalysisError::Malformed(format!(
                "probability {} is not a finite number",
                probability
            )));
        }
        Ok(Self {
            detected,
            probability: probability.clamp(0.0, 1.0),
        })
    }
}

/// The record republished for every successfully analysed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub camera: String,
    pub label: String,
    pub detected: bool,
    pub probability: f64,
}

impl DetectionResult {
    pub fn from_verdict(event: &Event, verdict: Verdict, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: event.id.clone(),
            timestamp,
            camera: event.camera.clone(),
            label: event.label.clone(),
            detected: verdict.detected,
            probability: verdict.probability,
        }
    }

    /// Outbound wire shape. The name of the boolean field is deployment
    /// specific (`reiger_detected` for a heron watcher).
    pub fn to_payload(&self, detected_field: &str) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        payload.insert("event_id".into(), self.event_id.clone().into());
        payload.insert("timestamp".into(), self.timestamp.to_rfc3339().into());
        payload.insert("camera".into(), self.camera.clone().into());
        payload.insert("label".into(), self.label.clone().into());
        payload.insert(detected_field.to_string(), self.detected.into());
        payload.insert("probability".into(), self.probability.into());
        payload.insert("status".into(), "Analyzed".into());
        serde_json::Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::event::RevisionKind;
    use chrono::TimeZone;

    #[test]
    fn verdict_clamps_probability() {
        assert_eq!(Verdict::new(true, 1.4).unwrap().probability, 1.0);
        assert_eq!(Verdict::new(false, -0.2).unwrap().probability, 0.0);
        assert!(Verdict::new(true, f64::NAN).is_err());
    }

    #[test]
    fn payload_carries_probability_even_when_not_detected() {
        let event = Event::new("e1", "Tuin", "bird", RevisionKind::End);
        let timestamp = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let result =
            DetectionResult::from_verdict(&event, Verdict::new(false, 0.12).unwrap(), timestamp);
        let payload = result.to_payload("reiger_detected");

        assert_eq!(payload["event_id"], "e1");
        assert_eq!(payload["camera"], "Tuin");
        assert_eq!(payload["reiger_detected"], false);
        assert_eq!(payload["probability"], 0.12);
        assert_eq!(payload["timestamp"], "2024-06-01T12:00:00+00:00");
        assert_eq!(payload["status"], "Analyzed");
    }
}
