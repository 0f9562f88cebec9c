/// Audit logging for kernel configuration changes
///
/// Fetch and apply operations are appended as JSON lines to
/// `<state dir>/audit.log`. Logging is opt-in via `enable_event_log`.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::core::sync::ApplyOutcome;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FetchConfig,
    ApplyConfig,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error or warning text
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Opens the audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    pub fn at(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Appends an event in JSON-lines format
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        Ok(content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

/// Hex SHA-256 of a wire payload
pub fn payload_digest(payload: &[u8]) -> String {
    Sha256::digest(payload)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub fn apply_event(rule_count: usize, payload: &[u8], outcome: &ApplyOutcome) -> AuditEvent {
    let (result, error) = match outcome {
        ApplyOutcome::AppliedAndVerified => ("verified", None),
        ApplyOutcome::AppliedWithWarning(w) => ("warned", Some(w.to_string())),
        ApplyOutcome::Rejected(reason) => ("rejected", Some(reason.to_string())),
    };
    AuditEvent::new(
        EventType::ApplyConfig,
        outcome.was_applied(),
        serde_json::json!({
            "rule_count": rule_count,
            "payload_sha256": payload_digest(payload),
            "result": result,
        }),
        error,
    )
}

pub fn fetch_event(rule_count: Option<usize>, error: Option<String>) -> AuditEvent {
    AuditEvent::new(
        EventType::FetchConfig,
        error.is_none(),
        serde_json::json!({ "rule_count": rule_count }),
        error,
    )
}

/// Logs an apply operation
pub async fn log_apply(rule_count: usize, payload: &[u8], outcome: &ApplyOutcome) {
    write_event(&apply_event(rule_count, payload, outcome)).await;
}

/// Logs a fetch operation
pub async fn log_fetch(rule_count: Option<usize>, error: Option<String>) {
    write_event(&fetch_event(rule_count, error)).await;
}

async fn write_event(event: &AuditEvent) {
    if let Ok(audit) = AuditLog::new()
        && let Err(e) = audit.log(event).await
    {
        tracing::warn!("Failed to write audit log: {}", e);
    }
}
