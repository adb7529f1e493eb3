//! Parsing, validation and sanitization for the log ingestion path.
//!
//! Two wire formats land on the single-log endpoint: a JSON envelope
//! (`{"log": {…}}`) and bare text lines in three recognized shapes. Both
//! produce a `LogPayload`; `validate` then turns a payload into a canonical
//! `LogRecord` or rejects it naming the first offending field.

use chrono::{DateTime, Duration, Utc};
use serde_json::Map;
use thiserror::Error;
use uuid::Uuid;

use fl_schemas::{LogLevel, LogPayload, LogRecord, LogSubmission};

pub mod text;

pub use text::parse_text_line;

/// Oldest accepted client timestamp, relative to now.
pub const MAX_AGE: Duration = Duration::days(7);
/// Furthest-future accepted client timestamp, relative to now.
pub const MAX_SKEW: Duration = Duration::hours(1);
/// Message length ceiling in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;
/// Service identifier length ceiling.
pub const MAX_SERVICE_CHARS: usize = 255;

/// Metadata keys that never survive sanitization, matched on the lowercased
/// key.
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "api_key",
    "apikey",
    "auth",
    "authorization",
    "credit_card",
    "ssn",
    "social_security",
];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty payload")]
    Empty,
}

/// A semantic rejection; `field` names the first offending field.
#[derive(Debug, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Parse the single-log endpoint body. JSON when the content type says so or
/// the body leads with `{`; plain text otherwise.
pub fn parse_single(content_type: Option<&str>, body: &str) -> Result<LogPayload, ParseError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let looks_json = content_type.is_some_and(|ct| ct.contains("json")) || trimmed.starts_with('{');
    if looks_json {
        let submission: LogSubmission = serde_json::from_str(trimmed)?;
        Ok(submission.log)
    } else {
        Ok(parse_text_line(trimmed))
    }
}

/// Validate and sanitize one payload into a storable record.
///
/// Checks run in a fixed order (timestamp window, service, level, message)
/// so the reported field is deterministic. Sanitization happens first: the
/// bounds apply to what would actually be stored.
pub fn validate(payload: LogPayload, now: DateTime<Utc>) -> Result<LogRecord, ValidationError> {
    let timestamp = payload.timestamp.unwrap_or(now);
    if timestamp.timestamp() == 0 {
        return Err(ValidationError::new("timestamp", "zero timestamp"));
    }
    if timestamp < now - MAX_AGE {
        return Err(ValidationError::new(
            "timestamp",
            "older than the 7-day ingestion window",
        ));
    }
    if timestamp > now + MAX_SKEW {
        return Err(ValidationError::new(
            "timestamp",
            "more than 1 hour in the future",
        ));
    }

    let service = sanitize_service(payload.service.as_deref().unwrap_or(""));
    if service.is_empty() {
        return Err(ValidationError::new("service", "must not be empty"));
    }
    if service.chars().count() > MAX_SERVICE_CHARS {
        return Err(ValidationError::new("service", "longer than 255 characters"));
    }

    let level = match payload.level.as_deref() {
        None => LogLevel::Info,
        Some(raw) => LogLevel::parse(raw)
            .ok_or_else(|| ValidationError::new("level", format!("unknown level {raw:?}")))?,
    };

    let message = sanitize_message(payload.message.as_deref().unwrap_or(""));
    if message.is_empty() {
        return Err(ValidationError::new("message", "must not be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ValidationError::new(
            "message",
            "longer than 10000 characters",
        ));
    }

    let metadata = sanitize_metadata(payload.metadata.unwrap_or_default());

    Ok(LogRecord {
        id: Uuid::new_v4(),
        timestamp,
        service,
        level,
        message,
        metadata,
    })
}

/// Strip C0 control characters except newline, tab and carriage return.
fn sanitize_message(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\x00'..='\x08' | '\x0B' | '\x0C' | '\x0E'..='\x1F'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Service identifiers are restricted to `[A-Za-z0-9_-]`.
fn sanitize_service(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Delete any metadata key whose lowercased form is sensitive.
fn sanitize_metadata(mut metadata: Map<String, serde_json::Value>) -> Map<String, serde_json::Value> {
    metadata.retain(|key, _| !SENSITIVE_KEYS.contains(&key.to_ascii_lowercase().as_str()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(message: &str) -> LogPayload {
        LogPayload {
            timestamp: Some(Utc::now()),
            service: Some("api".to_string()),
            level: Some("info".to_string()),
            message: Some(message.to_string()),
            metadata: None,
        }
    }

    #[test]
    fn json_envelope_parses() {
        let body = r#"{"log":{"service":"svc","level":"warn","message":"slow"}}"#;
        let p = parse_single(Some("application/json"), body).unwrap();
        assert_eq!(p.service.as_deref(), Some("svc"));
        assert_eq!(p.level.as_deref(), Some("warn"));
    }

    #[test]
    fn leading_brace_is_sniffed_as_json() {
        let body = r#"{"log":{"message":"hi"}}"#;
        let p = parse_single(None, body).unwrap();
        assert_eq!(p.message.as_deref(), Some("hi"));
    }

    #[test]
    fn broken_json_is_a_parse_error() {
        let err = parse_single(Some("application/json"), "{nope").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn empty_body_is_a_parse_error() {
        assert!(matches!(parse_single(None, "  \n"), Err(ParseError::Empty)));
    }

    #[test]
    fn plain_text_falls_through_to_the_line_parser() {
        let p = parse_single(Some("text/plain"), "ERROR billing: charge failed").unwrap();
        assert_eq!(p.level.as_deref(), Some("ERROR"));
        assert_eq!(p.service.as_deref(), Some("billing"));
    }

    #[test]
    fn valid_payload_normalizes_level() {
        let rec = validate(payload("hello"), Utc::now()).unwrap();
        assert_eq!(rec.level, LogLevel::Info);
        assert_eq!(rec.service, "api");
    }

    #[test]
    fn warning_alias_normalizes_to_warn() {
        let mut p = payload("hello");
        p.level = Some("Warning".to_string());
        let rec = validate(p, Utc::now()).unwrap();
        assert_eq!(rec.level, LogLevel::Warn);
    }

    #[test]
    fn missing_level_defaults_to_info() {
        let mut p = payload("hello");
        p.level = None;
        assert_eq!(validate(p, Utc::now()).unwrap().level, LogLevel::Info);
    }

    #[test]
    fn unknown_level_is_rejected_naming_the_field() {
        let mut p = payload("hello");
        p.level = Some("shout".to_string());
        let err = validate(p, Utc::now()).unwrap_err();
        assert_eq!(err.field, "level");
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let mut p = payload("hello");
        p.timestamp = None;
        let now = Utc::now();
        let rec = validate(p, now).unwrap();
        assert_eq!(rec.timestamp, now);
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let now = Utc::now();
        let mut p = payload("hello");
        p.timestamp = Some(now - Duration::days(8));
        assert_eq!(validate(p, now).unwrap_err().field, "timestamp");
    }

    #[test]
    fn future_timestamp_is_rejected() {
        let now = Utc::now();
        let mut p = payload("hello");
        p.timestamp = Some(now + Duration::hours(2));
        assert_eq!(validate(p, now).unwrap_err().field, "timestamp");
    }

    #[test]
    fn boundary_timestamps_are_accepted() {
        let now = Utc::now();
        let mut p = payload("old");
        p.timestamp = Some(now - MAX_AGE + Duration::seconds(1));
        assert!(validate(p, now).is_ok());

        let mut p = payload("soon");
        p.timestamp = Some(now + MAX_SKEW - Duration::seconds(1));
        assert!(validate(p, now).is_ok());
    }

    #[test]
    fn empty_message_is_rejected() {
        let err = validate(payload("   "), Utc::now()).unwrap_err();
        assert_eq!(err.field, "message");
    }

    #[test]
    fn oversized_message_is_rejected() {
        let err = validate(payload(&"x".repeat(10_001)), Utc::now()).unwrap_err();
        assert_eq!(err.field, "message");
    }

    #[test]
    fn message_at_the_limit_passes() {
        assert!(validate(payload(&"x".repeat(10_000)), Utc::now()).is_ok());
    }

    #[test]
    fn control_characters_are_stripped_but_newline_and_tab_stay() {
        let rec = validate(payload("a\x00b\x1fc\td\ne"), Utc::now()).unwrap();
        assert_eq!(rec.message, "abc\td\ne");
    }

    #[test]
    fn service_is_restricted_to_safe_charset() {
        let mut p = payload("hello");
        p.service = Some("my svc!@#".to_string());
        let rec = validate(p, Utc::now()).unwrap();
        assert_eq!(rec.service, "mysvc");
    }

    #[test]
    fn service_empty_after_sanitization_is_rejected() {
        let mut p = payload("hello");
        p.service = Some("!!!".to_string());
        assert_eq!(validate(p, Utc::now()).unwrap_err().field, "service");
    }

    #[test]
    fn sensitive_metadata_keys_are_deleted_case_insensitively() {
        let mut p = payload("hello");
        let mut meta = Map::new();
        meta.insert("Password".to_string(), json!("x"));
        meta.insert("API_KEY".to_string(), json!("y"));
        meta.insert("apikey".to_string(), json!("z"));
        meta.insert("Authorization".to_string(), json!("Bearer t"));
        meta.insert("kept".to_string(), json!("v"));
        p.metadata = Some(meta);

        let rec = validate(p, Utc::now()).unwrap();
        assert_eq!(rec.metadata.len(), 1);
        assert_eq!(rec.metadata["kept"], "v");
    }
}
