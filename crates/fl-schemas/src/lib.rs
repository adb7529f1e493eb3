//! Wire and domain types shared across the faultline workspace.
//!
//! Everything here is plain data: serde structs for the HTTP payloads and the
//! canonical in-process log record. Parsing, validation and persistence live
//! in their own crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// LogLevel
// ---------------------------------------------------------------------------

/// Severity of a log record. Stored and serialized uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// Case-insensitive parse. `WARNING` is an accepted alias for `WARN`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "FATAL" => Some(LogLevel::Fatal),
            "CRITICAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Log ingestion payloads
// ---------------------------------------------------------------------------

/// One log entry as submitted by a client, before validation.
///
/// Every field is optional at the wire level; the validator decides what is
/// required and what defaults apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogPayload {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Body of `POST /api/v1/logs` in JSON form.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSubmission {
    pub log: LogPayload,
}

/// Body of `POST /api/v1/logs/batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSubmission {
    pub logs: Vec<LogPayload>,
}

/// A validated, sanitized log record: the unit the batcher and store handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Notice ingestion payloads
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/notices`, wire-compatible with common error-reporter
/// conventions: `{error, request, server, breadcrumbs, notifier}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoticeRequest {
    #[serde(default)]
    pub error: NoticeError,
    #[serde(default)]
    pub request: Option<RequestInfo>,
    #[serde(default)]
    pub server: Option<ServerInfo>,
    #[serde(default)]
    pub breadcrumbs: Option<Breadcrumbs>,
    /// Reporting client metadata; stored opaquely, never interpreted.
    #[serde(default)]
    pub notifier: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoticeError {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub backtrace: Vec<BacktraceFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktraceFrame {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub function: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestInfo {
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub session: Option<Value>,
    #[serde(default)]
    pub cookies: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub environment_name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Ordered breadcrumb trail; entries are opaque documents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Breadcrumbs {
    #[serde(default)]
    pub trail: Vec<Value>,
}
