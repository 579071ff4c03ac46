//! Audit logging for signing runs.
//!
//! Audit events are `tracing` events with the `plugsign::audit` target. They are
//! silent unless a subscriber is installed, which [`init`] does.
//!
//! # Event Types
//!
//! - `signing.attempt` - A signing run started
//! - `key.loaded` - The signing key was unlocked
//! - `entry.signed` - One archive entry was signed
//! - `signing.success` - The signed archive was produced
//! - `signing.failure` - The run failed; no output was produced
//!
//! # JSON Output Example
//!
//! ```json
//! {
//!   "timestamp": "2026-01-04T20:00:00Z",
//!   "level": "INFO",
//!   "target": "plugsign::audit",
//!   "event_type": "signing.success",
//!   "correlation_id": "6f1c0d5e-...",
//!   "artifact_hash": "sha256:e3b0c442...",
//!   "entry_count": 2
//! }
//! ```

use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

static AUDIT_INITIALIZED: OnceLock<bool> = OnceLock::new();

pub const AUDIT_TARGET: &str = "plugsign::audit";

/// Audit log configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub destination: LogDestination,
    /// JSON lines rather than human-readable text
    pub json_format: bool,
    /// Filter directive (default: "plugsign::audit=info")
    pub filter: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: LogDestination::Stderr,
            json_format: true,
            filter: format!("{}=info", AUDIT_TARGET),
        }
    }
}

/// Audit log destination
#[derive(Debug, Clone, Default)]
pub enum LogDestination {
    Stdout,
    #[default]
    Stderr,
    /// Append to a file
    File(String),
}

/// Install the audit subscriber. Only the first call has an effect.
pub fn init(config: AuditConfig) -> Result<(), crate::PSError> {
    if AUDIT_INITIALIZED.get().is_some() {
        return Ok(());
    }
    if !config.enabled {
        let _ = AUDIT_INITIALIZED.set(true);
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.filter)
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", AUDIT_TARGET)));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (config.destination, config.json_format) {
        (LogDestination::Stdout, true) => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(std::io::stdout),
            )
            .try_init(),
        (LogDestination::Stdout, false) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stdout))
            .try_init(),
        (LogDestination::Stderr, true) => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        (LogDestination::Stderr, false) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        (LogDestination::File(path), json) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            let writer = std::sync::Mutex::new(file);
            if json {
                registry
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(FmtSpan::NONE)
                            .with_writer(writer),
                    )
                    .try_init()
            } else {
                registry
                    .with(fmt::layer().with_target(true).with_writer(writer))
                    .try_init()
            }
        }
    };
    result.map_err(|e| crate::PSError::InternalError(format!("audit init: {}", e)))?;
    let _ = AUDIT_INITIALIZED.set(true);
    Ok(())
}

/// Generate a new correlation ID tying together the events of one run.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn log_signing_attempt(correlation_id: &str, artifact_hash: &str) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "signing.attempt",
        correlation_id = correlation_id,
        artifact_hash = artifact_hash,
        "Signing run initiated"
    );
}

pub fn log_key_loaded(correlation_id: &str, key_id: &str, signing_key_id: &str) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "key.loaded",
        correlation_id = correlation_id,
        key_id = key_id,
        signing_key_id = signing_key_id,
        "Signing key unlocked"
    );
}

pub fn log_entry_signed(correlation_id: &str, path: &str, content_hash: &str) {
    tracing::debug!(
        target: AUDIT_TARGET,
        event_type = "entry.signed",
        correlation_id = correlation_id,
        path = path,
        content_hash = content_hash,
        "Archive entry signed"
    );
}

pub fn log_signing_success(
    correlation_id: &str,
    artifact_hash: &str,
    output_hash: &str,
    entry_count: usize,
) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "signing.success",
        correlation_id = correlation_id,
        artifact_hash = artifact_hash,
        output_hash = output_hash,
        entry_count = entry_count,
        "Signing run completed successfully"
    );
}

pub fn log_signing_failure(
    correlation_id: &str,
    artifact_hash: &str,
    stage: &str,
    error_type: &str,
    error_message: &str,
) {
    let safe_message = sanitize_error_message(error_message);
    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = "signing.failure",
        correlation_id = correlation_id,
        artifact_hash = artifact_hash,
        stage = stage,
        error_type = error_type,
        error_message = %safe_message,
        "Signing run failed"
    );
}

/// Redact long token-like words and cap the message length.
fn sanitize_error_message(message: &str) -> String {
    let sanitized = message
        .split_whitespace()
        .map(|word| {
            if word.len() > 40 && word.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
            {
                "[REDACTED]"
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if sanitized.len() > 500 {
        let mut end = 497;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &sanitized[..end])
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_error_message() {
        assert_eq!(
            sanitize_error_message("Unable to sign entry 'index.js'"),
            "Unable to sign entry 'index.js'"
        );
        let with_token = "Failed with token eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9eyJzdWIiOiIxMjM0NTY3ODkwIn0";
        assert!(sanitize_error_message(with_token).contains("[REDACTED]"));
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "word ".repeat(200);
        let sanitized = sanitize_error_message(&long);
        assert_eq!(sanitized.len(), 500);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn test_correlation_id_format() {
        let id = new_correlation_id();
        assert_eq!(id.len(), 36);
        assert_eq!(id.chars().filter(|c| *c == '-').count(), 4);
    }

    #[test]
    fn test_events_without_subscriber() {
        log_signing_attempt("id", "sha256:00");
        log_key_loaded("id", "0123456789ABCDEF", "FEDCBA9876543210");
        log_entry_signed("id", "index.js", "sha256:00");
        log_signing_success("id", "sha256:00", "sha256:11", 2);
        log_signing_failure("id", "sha256:00", "signing", "signing", "boom");
    }
}
