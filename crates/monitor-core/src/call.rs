//! Call records and their merge semantics
//!
//! This module defines the canonical shape of a call as tracked by the
//! synchronizer, together with the two rules everything else leans on:
//!
//! - **Normalization** - the wire speaks both snake_case (REST) and
//!   camelCase (stream) and may encode ids as JSON strings or numbers.
//!   [`CallPayload`] accepts every spelling and produces one canonical
//!   [`CallRecord`]; the ambiguity never propagates past this module.
//! - **Non-destructive merge** - an absent or empty incoming value never
//!   overwrites a known one. A partial update carrying only a transcript
//!   excerpt cannot erase a previously learned phone number.
//!
//! # Examples
//!
//! ```rust
//! use callwatch_monitor_core::call::{CallPayload, CallRecord, is_active_status};
//!
//! let payload: CallPayload = serde_json::from_str(
//!     r#"{"id": "c1", "status": "ringing", "phoneNumber": "+15550001"}"#,
//! ).unwrap();
//! let record = CallRecord::from_payload(payload);
//!
//! assert_eq!(record.id, "c1");
//! assert_eq!(record.phone_number.as_deref(), Some("+15550001"));
//! assert!(is_active_status(record.status.as_deref()));
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Statuses that classify a call as active, compared case-insensitively.
pub const ACTIVE_STATUSES: [&str; 3] = ["in-progress", "ringing", "queued"];

/// Whether a status string classifies a call as active.
///
/// Anything outside [`ACTIVE_STATUSES`] - including `ended`, `completed`,
/// `failed`, and an absent status - is inactive.
pub fn is_active_status(status: Option<&str>) -> bool {
    match status {
        Some(s) => {
            let s = s.trim().to_ascii_lowercase();
            ACTIVE_STATUSES.contains(&s.as_str())
        }
        None => false,
    }
}

/// The canonical call shape held by the reconciler.
///
/// Identified by an opaque string `id`, unique within a tenant. Every field
/// except `id` and `created_at` is optional; the detail fields
/// (transcripts, summary, notes, feedback) are populated progressively by
/// later partial updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Opaque call identifier, unique within a tenant.
    pub id: String,
    /// When the call was first seen by the backend. Defaults to the ingest
    /// time when the wire omits it.
    pub created_at: DateTime<Utc>,
    /// Current status; one of a small open set of strings.
    pub status: Option<String>,
    pub phone_number: Option<String>,
    pub username: Option<String>,
    pub user_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Call duration in seconds.
    pub duration: Option<i64>,
    pub cost: Option<f64>,
    /// Incremental transcript for in-progress calls.
    pub live_transcript: Option<String>,
    /// Transcript from the end-of-call report.
    pub final_transcript: Option<String>,
    /// End-of-call summary / metrics blob.
    pub summary: Option<Value>,
    pub notes: Option<String>,
    pub recording_url: Option<String>,
    pub sentiment: Option<String>,
    pub disposition: Option<String>,
    pub feedback_rating: Option<i32>,
    pub feedback_text: Option<String>,
    /// Whether the deep-detail fields have been fetched for this call.
    pub details_loaded: bool,
}

impl Default for CallRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            created_at: Utc::now(),
            status: None,
            phone_number: None,
            username: None,
            user_id: None,
            started_at: None,
            ended_at: None,
            duration: None,
            cost: None,
            live_transcript: None,
            final_transcript: None,
            summary: None,
            notes: None,
            recording_url: None,
            sentiment: None,
            disposition: None,
            feedback_rating: None,
            feedback_text: None,
            details_loaded: false,
        }
    }
}

impl CallRecord {
    /// Build a canonical record from a decoded wire payload.
    ///
    /// `created_at` falls back to `started_at`, then to the ingest time,
    /// so the required field is always populated.
    pub fn from_payload(payload: CallPayload) -> Self {
        let created_at = payload
            .created_at
            .or(payload.started_at)
            .unwrap_or_else(Utc::now);
        Self {
            id: payload.id,
            created_at,
            status: non_empty(payload.status),
            phone_number: non_empty(payload.phone_number),
            username: non_empty(payload.username),
            user_id: non_empty(payload.user_id),
            started_at: payload.started_at,
            ended_at: payload.ended_at,
            duration: payload.duration,
            cost: payload.cost,
            live_transcript: non_empty(payload.live_transcript),
            final_transcript: non_empty(payload.final_transcript),
            summary: payload.summary,
            notes: non_empty(payload.notes),
            recording_url: non_empty(payload.recording_url),
            sentiment: non_empty(payload.sentiment),
            disposition: non_empty(payload.disposition),
            feedback_rating: payload.feedback_rating,
            feedback_text: non_empty(payload.feedback_text),
            details_loaded: false,
        }
    }

    /// Merge `incoming` into `self`, field by field.
    ///
    /// A field is overwritten only when the incoming value is present and
    /// non-empty; otherwise the existing value is kept. `details_loaded`
    /// is sticky once set.
    pub fn merge_from(&mut self, incoming: CallRecord) {
        merge_text(&mut self.status, incoming.status);
        merge_text(&mut self.phone_number, incoming.phone_number);
        merge_text(&mut self.username, incoming.username);
        merge_text(&mut self.user_id, incoming.user_id);
        // Earliest wins: a genuine creation time predates any ingest-time
        // fallback stamped by normalization.
        self.created_at = self.created_at.min(incoming.created_at);
        merge_value(&mut self.started_at, incoming.started_at);
        merge_value(&mut self.ended_at, incoming.ended_at);
        merge_value(&mut self.duration, incoming.duration);
        merge_value(&mut self.cost, incoming.cost);
        merge_text(&mut self.live_transcript, incoming.live_transcript);
        merge_text(&mut self.final_transcript, incoming.final_transcript);
        merge_value(&mut self.summary, incoming.summary);
        merge_text(&mut self.notes, incoming.notes);
        merge_text(&mut self.recording_url, incoming.recording_url);
        merge_text(&mut self.sentiment, incoming.sentiment);
        merge_text(&mut self.disposition, incoming.disposition);
        merge_value(&mut self.feedback_rating, incoming.feedback_rating);
        merge_text(&mut self.feedback_text, incoming.feedback_text);
        self.details_loaded = self.details_loaded || incoming.details_loaded;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn merge_text(existing: &mut Option<String>, incoming: Option<String>) {
    if let Some(v) = non_empty(incoming) {
        *existing = Some(v);
    }
}

fn merge_value<T>(existing: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *existing = incoming;
    }
}

/// A call as it appears on the wire, before normalization.
///
/// Accepts both field-naming conventions the backend uses: snake_case from
/// the REST endpoints and camelCase from the stream. Ids arrive as JSON
/// strings or numbers and are normalized to strings, so the numeric and
/// string forms of the same id compare equal downstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallPayload {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "phoneNumber")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default, alias = "createdAt", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "startedAt", deserialize_with = "lenient_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "endedAt", deserialize_with = "lenient_timestamp")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default, alias = "liveTranscript")]
    pub live_transcript: Option<String>,
    #[serde(default, alias = "finalTranscript")]
    pub final_transcript: Option<String>,
    #[serde(default)]
    pub summary: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "recordingUrl")]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub disposition: Option<String>,
    #[serde(default, alias = "feedbackRating")]
    pub feedback_rating: Option<i32>,
    #[serde(default, alias = "feedbackText")]
    pub feedback_text: Option<String>,
}

/// Deserialize an id from either a JSON string or a JSON number.
pub(crate) fn id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Text(s) => s,
        IdRepr::Int(n) => n.to_string(),
        IdRepr::Float(x) if x.fract() == 0.0 => format!("{}", x as i64),
        IdRepr::Float(x) => x.to_string(),
    })
}

/// Deserialize a timestamp, tolerating the backend's naive-UTC form.
///
/// The backend emits RFC 3339 in stream frames but naive
/// `datetime.utcnow().isoformat()` strings from REST responses. An
/// unparseable value degrades to `None` rather than failing the record.
fn lenient_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else { return Ok(None) };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(parse_timestamp(raw))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    warn!(value = raw, "dropping unrecognized timestamp");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_accepts_both_naming_conventions() {
        let camel: CallPayload = serde_json::from_str(
            r#"{"id": "c1", "phoneNumber": "+15550001", "startedAt": "2026-01-05T10:00:00Z"}"#,
        )
        .unwrap();
        let snake: CallPayload = serde_json::from_str(
            r#"{"id": "c1", "phone_number": "+15550001", "started_at": "2026-01-05T10:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(camel.phone_number.as_deref(), Some("+15550001"));
        assert_eq!(snake.phone_number.as_deref(), Some("+15550001"));
        assert_eq!(camel.started_at, snake.started_at);
    }

    #[test]
    fn numeric_id_normalizes_to_string() {
        let payload: CallPayload = serde_json::from_str(r#"{"id": 4217}"#).unwrap();
        assert_eq!(payload.id, "4217");

        let payload: CallPayload = serde_json::from_str(r#"{"id": "4217"}"#).unwrap();
        assert_eq!(payload.id, "4217");
    }

    #[test]
    fn naive_utc_timestamps_are_accepted() {
        let payload: CallPayload = serde_json::from_str(
            r#"{"id": "c1", "created_at": "2026-01-05T10:00:00.123456"}"#,
        )
        .unwrap();
        assert!(payload.created_at.is_some());
    }

    #[test]
    fn unparseable_timestamp_degrades_to_none() {
        let payload: CallPayload =
            serde_json::from_str(r#"{"id": "c1", "created_at": "last tuesday"}"#).unwrap();
        assert!(payload.created_at.is_none());
    }

    #[test]
    fn active_classification_is_case_insensitive() {
        assert!(is_active_status(Some("in-progress")));
        assert!(is_active_status(Some("Ringing")));
        assert!(is_active_status(Some("QUEUED")));
        assert!(!is_active_status(Some("ended")));
        assert!(!is_active_status(Some("completed")));
        assert!(!is_active_status(Some("failed")));
        assert!(!is_active_status(Some("")));
        assert!(!is_active_status(None));
    }

    #[test]
    fn merge_keeps_known_fields_when_incoming_is_empty() {
        let mut record = CallRecord {
            id: "c1".into(),
            phone_number: Some("+1555".into()),
            status: Some("in-progress".into()),
            ..Default::default()
        };

        let update = CallRecord {
            id: "c1".into(),
            live_transcript: Some("hello there".into()),
            ..Default::default()
        };
        record.merge_from(update);

        assert_eq!(record.phone_number.as_deref(), Some("+1555"));
        assert_eq!(record.live_transcript.as_deref(), Some("hello there"));
    }

    #[test]
    fn merge_overwrites_with_present_values() {
        let mut record = CallRecord {
            id: "c1".into(),
            status: Some("ringing".into()),
            duration: Some(5),
            ..Default::default()
        };

        let update = CallRecord {
            id: "c1".into(),
            status: Some("in-progress".into()),
            duration: Some(42),
            ..Default::default()
        };
        record.merge_from(update);

        assert_eq!(record.status.as_deref(), Some("in-progress"));
        assert_eq!(record.duration, Some(42));
    }

    #[test]
    fn whitespace_only_values_do_not_overwrite() {
        let mut record = CallRecord {
            id: "c1".into(),
            username: Some("supervisor-7".into()),
            ..Default::default()
        };

        let update = CallRecord {
            id: "c1".into(),
            username: Some("   ".into()),
            ..Default::default()
        };
        record.merge_from(update);

        assert_eq!(record.username.as_deref(), Some("supervisor-7"));
    }

    #[test]
    fn details_loaded_is_sticky() {
        let mut record = CallRecord {
            id: "c1".into(),
            details_loaded: true,
            ..Default::default()
        };
        record.merge_from(CallRecord {
            id: "c1".into(),
            ..Default::default()
        });
        assert!(record.details_loaded);
    }
}
