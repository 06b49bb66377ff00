//! Error types for pricewatch.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Retryability flags for scripted callers
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers
//!
//! Probe failures have their own taxonomy ([`ProbeError`]) because they never
//! cross the orchestrator boundary as errors: they are folded into
//! observations and counted as failed checks.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pricewatch operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,
    StorageError,

    // Not Found (exit 3)
    UserNotFound,
    TrackingNotFound,
    LocationNotFound,

    // Validation (exit 4)
    InvalidArgument,

    // Busy (exit 5)
    RunInProgress,

    // Probe / network (exit 6)
    ProbeError,
    HttpError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Notification (exit 9)
    NotificationUnreachable,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::StorageError => "STORAGE_ERROR",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::TrackingNotFound => "TRACKING_NOT_FOUND",
            Self::LocationNotFound => "LOCATION_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::RunInProgress => "RUN_IN_PROGRESS",
            Self::ProbeError => "PROBE_ERROR",
            Self::HttpError => "HTTP_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::NotificationUnreachable => "NOTIFICATION_UNREACHABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::DatabaseError
            | Self::StorageError => 2,
            Self::UserNotFound | Self::TrackingNotFound | Self::LocationNotFound => 3,
            Self::InvalidArgument => 4,
            Self::RunInProgress => 5,
            Self::ProbeError | Self::HttpError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::NotificationUnreachable => 9,
        }
    }

    /// Whether retrying the same operation later can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError
                | Self::StorageError
                | Self::RunInProgress
                | Self::ProbeError
                | Self::HttpError
                | Self::NotificationUnreachable
        )
    }
}

// ── Probe Error ───────────────────────────────────────────────

/// Failure of a single retailer probe.
///
/// Carried inside an [`Observation`](crate::model::Observation) rather than
/// propagated, so one bad page never aborts a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("unrecognized page structure: {0}")]
    ParseFailure(String),

    #[error("request blocked by retailer (HTTP {status})")]
    Blocked { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),
}

impl ProbeError {
    /// Parse failures are deterministic for a given page; everything else
    /// may clear up on the next attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ParseFailure(_))
    }

    /// Short label used in logs and stored run diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ParseFailure(_) => "parse_failure",
            Self::Blocked { .. } => "blocked",
            Self::Transport(_) => "transport",
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            if status.as_u16() == 403 || status.as_u16() == 429 {
                Self::Blocked {
                    status: status.as_u16(),
                }
            } else {
                Self::Transport(format!("HTTP {status}"))
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in pricewatch operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `pricewatch init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    #[error("Tracking request not found: {id}")]
    TrackingNotFound { id: i64 },

    #[error("Location not found: {zip_code}")]
    LocationNotFound { zip_code: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Another check run is in progress (started at {started_at})")]
    RunInProgress { started_at: i64 },

    #[error("Notification recipient unreachable: {recipient} ({reason})")]
    NotificationUnreachable { recipient: String, reason: String },

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Storage(_) => ErrorCode::StorageError,
            Self::UserNotFound { .. } => ErrorCode::UserNotFound,
            Self::TrackingNotFound { .. } => ErrorCode::TrackingNotFound,
            Self::LocationNotFound { .. } => ErrorCode::LocationNotFound,
            Self::RunInProgress { .. } => ErrorCode::RunInProgress,
            Self::NotificationUnreachable { .. } => ErrorCode::NotificationUnreachable,
            Self::Probe(_) => ErrorCode::ProbeError,
            Self::Http(_) => ErrorCode::HttpError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => {
                Some("Run `pricewatch init` to create the database".to_string())
            }

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::UserNotFound { id } => Some(format!(
                "No user with Discord ID '{id}'. Register one with `pricewatch user add`."
            )),

            Self::TrackingNotFound { .. } => Some(
                "Use `pricewatch track list <discord-id>` to see active tracking IDs.".to_string(),
            ),

            Self::LocationNotFound { .. } => {
                Some("Use `pricewatch zip list <discord-id>` to see configured ZIP codes.".to_string())
            }

            Self::InvalidArgument(msg) => {
                if msg.contains("ZIP") {
                    Some("ZIP codes are exactly 5 digits, e.g. 10001".to_string())
                } else if msg.contains("threshold") {
                    Some("Thresholds are dollar amounts between $0.01 and $10,000".to_string())
                } else if msg.contains("URL") {
                    Some(
                        "Supported URLs: walmart.com/ip/<name>/<id> and target.com/p/<name>/-/A-<id>"
                            .to_string(),
                    )
                } else {
                    None
                }
            }

            Self::RunInProgress { .. } => Some(
                "Wait for the running check to finish; a stale lease from a crashed run expires on its own."
                    .to_string(),
            ),

            Self::Config(_) => Some(
                "Check ~/.pricewatch/config.json and the PRICEWATCH_* / DISCORD_* environment variables"
                    .to_string(),
            ),

            Self::Database(_)
            | Self::Storage(_)
            | Self::NotificationUnreachable { .. }
            | Self::Probe(_)
            | Self::Http(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(Error::NotInitialized.exit_code(), 2);
        assert_eq!(Error::UserNotFound { id: "1".into() }.exit_code(), 3);
        assert_eq!(Error::InvalidArgument("bad".into()).exit_code(), 4);
        assert_eq!(Error::RunInProgress { started_at: 0 }.exit_code(), 5);
        assert_eq!(Error::Probe(ProbeError::Timeout).exit_code(), 6);
        assert_eq!(Error::Config("x".into()).exit_code(), 7);
        let unreachable = Error::NotificationUnreachable {
            recipient: "42".into(),
            reason: "DMs disabled".into(),
        };
        assert_eq!(unreachable.exit_code(), 9);
    }

    #[test]
    fn test_probe_error_retryability() {
        assert!(ProbeError::Timeout.is_retryable());
        assert!(ProbeError::Blocked { status: 429 }.is_retryable());
        assert!(ProbeError::Transport("reset".into()).is_retryable());
        assert!(!ProbeError::ParseFailure("no data".into()).is_retryable());
    }

    #[test]
    fn test_structured_json_includes_hint() {
        let err = Error::InvalidArgument("ZIP code must be 5 digits".into());
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "INVALID_ARGUMENT");
        assert_eq!(json["error"]["exit_code"], 4);
        assert!(json["error"]["hint"].as_str().unwrap().contains("5 digits"));
    }
}
