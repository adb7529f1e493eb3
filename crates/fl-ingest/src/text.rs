//! Plain-text log line parsing.
//!
//! Three recognized shapes:
//!
//! ```text
//! [2024-01-01T12:00:00Z] LEVEL service: message
//! LEVEL service: message
//! service [LEVEL]: message
//! ```
//!
//! Anything else becomes a message-only payload: level INFO, service
//! "unknown", timestamp now. This parser never fails.

use chrono::{DateTime, Utc};

use fl_schemas::{LogLevel, LogPayload};

pub fn parse_text_line(line: &str) -> LogPayload {
    let mut rest = line.trim();

    // Optional leading `[RFC3339]` timestamp.
    let mut timestamp: Option<DateTime<Utc>> = None;
    if let Some(stripped) = rest.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            if let Ok(ts) = DateTime::parse_from_rfc3339(stripped[..end].trim()) {
                timestamp = Some(ts.with_timezone(&Utc));
                rest = stripped[end + 1..].trim_start();
            }
        }
    }

    let (level, service, message) = split_head(rest);

    LogPayload {
        timestamp,
        service: Some(service),
        level: Some(level.as_str().to_string()),
        message: Some(message),
        metadata: None,
    }
}

/// Split `rest` into (level, service, message) per the recognized head
/// shapes, defaulting level to INFO and service to "unknown".
fn split_head(rest: &str) -> (LogLevel, String, String) {
    if let Some((head, message)) = rest.split_once(':') {
        let head = head.trim();
        let message = message.trim();

        // `service [LEVEL]`
        if let Some(inner) = head.strip_suffix(']') {
            if let Some(open) = inner.rfind('[') {
                if let Some(level) = LogLevel::parse(&inner[open + 1..]) {
                    let service = inner[..open].trim();
                    if !service.is_empty() && !message.is_empty() {
                        return (level, service.to_string(), message.to_string());
                    }
                }
            }
        }

        // `LEVEL service`
        let tokens: Vec<&str> = head.split_whitespace().collect();
        if tokens.len() == 2 && !message.is_empty() {
            if let Some(level) = LogLevel::parse(tokens[0]) {
                return (level, tokens[1].to_string(), message.to_string());
            }
            // Unknown level word still reads as a header: default INFO.
            return (LogLevel::Info, tokens[1].to_string(), message.to_string());
        }
        if tokens.len() == 1 && !message.is_empty() {
            if let Some(level) = LogLevel::parse(tokens[0]) {
                return (level, "unknown".to_string(), message.to_string());
            }
        }
    }

    (LogLevel::Info, "unknown".to_string(), rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn full_form_with_timestamp() {
        let p = parse_text_line("[2024-01-01T12:00:00Z] ERROR payments: charge declined");
        assert_eq!(
            p.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(p.level.as_deref(), Some("ERROR"));
        assert_eq!(p.service.as_deref(), Some("payments"));
        assert_eq!(p.message.as_deref(), Some("charge declined"));
    }

    #[test]
    fn level_service_form() {
        let p = parse_text_line("warn api: queue is deep");
        assert_eq!(p.level.as_deref(), Some("WARN"));
        assert_eq!(p.service.as_deref(), Some("api"));
        assert_eq!(p.message.as_deref(), Some("queue is deep"));
        assert!(p.timestamp.is_none());
    }

    #[test]
    fn service_bracket_level_form() {
        let p = parse_text_line("worker [CRITICAL]: out of disk");
        assert_eq!(p.level.as_deref(), Some("CRITICAL"));
        assert_eq!(p.service.as_deref(), Some("worker"));
        assert_eq!(p.message.as_deref(), Some("out of disk"));
    }

    #[test]
    fn unknown_level_defaults_to_info() {
        let p = parse_text_line("noise api: something");
        assert_eq!(p.level.as_deref(), Some("INFO"));
        assert_eq!(p.service.as_deref(), Some("api"));
    }

    #[test]
    fn bare_message_gets_all_defaults() {
        let p = parse_text_line("just some words");
        assert_eq!(p.level.as_deref(), Some("INFO"));
        assert_eq!(p.service.as_deref(), Some("unknown"));
        assert_eq!(p.message.as_deref(), Some("just some words"));
    }

    #[test]
    fn message_may_contain_colons() {
        let p = parse_text_line("ERROR api: upstream said: 502");
        assert_eq!(p.message.as_deref(), Some("upstream said: 502"));
    }

    #[test]
    fn bad_timestamp_bracket_is_left_in_the_message() {
        let p = parse_text_line("[not-a-time] hello");
        assert!(p.timestamp.is_none());
        assert_eq!(p.message.as_deref(), Some("[not-a-time] hello"));
    }

    #[test]
    fn level_only_head_defaults_service() {
        let p = parse_text_line("FATAL: kernel panic");
        assert_eq!(p.level.as_deref(), Some("FATAL"));
        assert_eq!(p.service.as_deref(), Some("unknown"));
        assert_eq!(p.message.as_deref(), Some("kernel panic"));
    }
}
