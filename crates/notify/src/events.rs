//! Notification event types for sentinel investigations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity levels carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Immediate action required
    Critical,
    /// Something needs attention
    Warning,
    /// Informational, nothing actionable
    Info,
    /// A previously reported condition has cleared
    Resolved,
}

impl Severity {
    /// Attachment strip color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Critical => "#dc3545",
            Self::Warning => "#ffc107",
            Self::Info => "#0d6efd",
            Self::Resolved => "#198754",
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Slack emoji shortcode for this severity.
    #[must_use]
    pub const fn emoji(&self) -> &'static str {
        match self {
            Self::Critical => ":red_circle:",
            Self::Warning => ":warning:",
            Self::Info => ":large_blue_circle:",
            Self::Resolved => ":white_check_mark:",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// An investigation reached a Finding
    Finding {
        /// Investigation identifier
        investigation_id: String,
        /// Severity assigned to the Finding
        severity: Severity,
        /// One-line summary
        title: String,
        /// Rendered report body (already length-bounded)
        body: String,
        /// Whether the evidence was inconclusive
        #[serde(default)]
        inconclusive: bool,
        /// Extra key/value context (alert kind, target, playbook)
        #[serde(default)]
        context: BTreeMap<String, String>,
        /// Event timestamp
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get the title for this event.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::Finding { title, .. } => title.clone(),
        }
    }

    /// Get the severity for this event.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Finding { severity, .. } => *severity,
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Finding { timestamp, .. } => *timestamp,
        }
    }

    /// Get the message body for this event.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Finding { body, .. } => body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Resolved).unwrap();
        assert_eq!(json, "\"resolved\"");
    }

    #[test]
    fn test_finding_event_roundtrips_type_tag() {
        let event = NotifyEvent::Finding {
            investigation_id: "abc".to_string(),
            severity: Severity::Critical,
            title: "Service outage".to_string(),
            body: "[CRITICAL] ...".to_string(),
            inconclusive: false,
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "finding");
        assert_eq!(value["severity"], "critical");
    }
}
