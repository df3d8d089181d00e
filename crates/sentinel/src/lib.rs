//! Sentinel: budgeted root-cause investigation for Kubernetes alerts.
//!
//! An [`Alert`] selects a [`Playbook`](playbook::Playbook); the
//! [`Investigator`] walks its steps against the metrics and log backends,
//! spending at most [`MAX_EVIDENCE_CALLS`] queries; the [`Correlator`] turns
//! what came back into typed signals; [`classify`] picks a severity; and the
//! [`ReportComposer`] renders a short Finding for delivery.
//!
//! # Modules
//!
//! - [`alert`]: alert kinds, targets and intake formats
//! - [`evidence`]: the evidence source trait and its HTTP backends
//! - [`playbook`]: the static playbook library
//! - [`scheduler`]: the budgeted step scheduler
//! - [`correlator`]: evidence to signals
//! - [`severity`]: signal set to severity
//! - [`report`]: Findings and their rendered reports
//! - [`server`]: HTTP intake
//! - [`config`]: runtime configuration

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alert;
pub mod config;
pub mod correlator;
pub mod evidence;
pub mod playbook;
pub mod report;
pub mod scheduler;
pub mod server;
pub mod severity;
pub mod signal;

pub use alert::{Alert, AlertIntake, AlertKind, Target};
pub use config::SentinelConfig;
pub use correlator::Correlator;
pub use evidence::{ClusterEvidence, Evidence, EvidenceError, EvidenceQuery, EvidenceSource};
pub use playbook::PlaybookLibrary;
pub use report::{Finding, ReportComposer};
pub use scheduler::{InvestigationError, Investigator, MAX_EVIDENCE_CALLS};
pub use severity::{classify, Severity};
pub use signal::{Signal, SignalKey, SignalSet};
