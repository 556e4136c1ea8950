//! Structured Logging for the keydex Directory Server
//!
//! Provides production-ready structured logging with:
//! - JSON output for log aggregation services
//! - Structured event records for epoch cuts, registrations, and
//!   verification failures
//!
//! # Usage
//!
//! ```rust,ignore
//! use keydex::logging::{init_logging, LogLevel};
//!
//! // Initialize at startup
//! init_logging(LogLevel::Info, true)?; // JSON mode for production
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Epoch cuts and policy rotations
    Epoch,
    /// Registration events
    Registration,
    /// Lookup and monitoring events
    Lookup,
    /// Security events (verification failures, malformed requests)
    Security,
    /// System events (startup, shutdown, reload)
    System,
    /// Error events
    Error,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    /// Log level
    pub level: String,
    /// Event category
    pub category: EventCategory,
    /// Human-readable message
    pub message: String,
    /// Additional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Duration in milliseconds (for timed events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            data: None,
            duration_ms: None,
        }
    }

    /// Add structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add duration
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Render this event to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Event Helpers
// ============================================================================

/// Log an epoch cut
pub fn log_epoch_event(epoch: u64, tree_hash: &str, duration_ms: u64) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Epoch, "epoch cut")
        .with_duration(duration_ms)
        .with_data(serde_json::json!({
            "epoch": epoch,
            "tree_hash": tree_hash,
        }));
    tracing::info!(target: "keydex::epoch", "{}", event.to_json());
}

/// Log a registration attempt
pub fn log_registration_event(username: &str, success: bool, error: Option<&str>) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let event = LogEvent::new(level, EventCategory::Registration, "registration")
        .with_data(serde_json::json!({
            "username": username,
            "success": success,
            "error": error,
        }));
    if success {
        tracing::info!(target: "keydex::registration", "{}", event.to_json());
    } else {
        tracing::warn!(target: "keydex::registration", "{}", event.to_json());
    }
}

/// Log a security-relevant event
pub fn log_security_event(event_type: &str, details: serde_json::Value) {
    let event = LogEvent::new(LogLevel::Warn, EventCategory::Security, event_type)
        .with_data(details);
    tracing::warn!(target: "keydex::security", "{}", event.to_json());
}

// ============================================================================
// Initialization
// ============================================================================

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (recommended for production)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let level_str = format!("{:?}", level).to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "keydex={level_str},tower_http={level_str},axum={level_str}"
        ))
    });

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE),
        );
        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE),
        );
        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from the loaded configuration
pub fn init_from_config(config: &crate::config::KeydexConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.log_json)
}

// ============================================================================
// Tests
// ============================================================================
