//! Severity classification.
//!
//! A pure precedence table over the signal set, evaluated top-down:
//!
//! 1. `ServiceOutage` or `DataLossRisk` → critical
//! 2. a warning-class signal without its `Resolved` counterpart → warning
//! 3. any `Resolved` → resolved
//! 4. any other observation → info
//! 5. nothing observed (only `EvidenceUnavailable`, or empty) → info, inconclusive

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::signal::{SignalKey, SignalKind, SignalSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
    Resolved,
}

impl Severity {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Whether a report carries a recommended next action.
    #[must_use]
    pub const fn is_actionable(self) -> bool {
        matches!(self, Self::Critical | Self::Warning)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<Severity> for notify::Severity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::Critical,
            Severity::Warning => Self::Warning,
            Severity::Info => Self::Info,
            Severity::Resolved => Self::Resolved,
        }
    }
}

/// Result of classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub severity: Severity,
    /// The signal that decided the severity
    pub cause: Option<SignalKey>,
    pub inconclusive: bool,
}

#[must_use]
pub fn classify(signals: &SignalSet) -> Classification {
    let decided = |severity, cause: &SignalKey| Classification {
        severity,
        cause: Some(cause.clone()),
        inconclusive: false,
    };

    if let Some(key) = signals
        .keys()
        .find(|k| matches!(k.kind(), SignalKind::ServiceOutage | SignalKind::DataLossRisk))
    {
        return decided(Severity::Critical, key);
    }

    if let Some(key) = signals.active_warnings().next() {
        return decided(Severity::Warning, key);
    }

    if let Some(key) = signals.keys().find(|k| k.kind() == SignalKind::Resolved) {
        return decided(Severity::Resolved, key);
    }

    if let Some(key) = signals
        .keys()
        .find(|k| k.kind() != SignalKind::EvidenceUnavailable)
    {
        return decided(Severity::Info, key);
    }

    Classification {
        severity: Severity::Info,
        cause: None,
        inconclusive: true,
    }
}
