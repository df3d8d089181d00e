//! Delivery of sentinel investigation findings to chat channels.
//!
//! This crate provides a fire-and-forget notification system for sending
//! findings to Slack (and any other channel implementing [`NotifyChannel`]).
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent, Severity};
//!
//! # async fn run() {
//! // Create notifier from environment variables
//! let notifier = Notifier::from_env();
//!
//! // Send a notification (fire-and-forget)
//! notifier.notify(NotifyEvent::Finding {
//!     investigation_id: "3f0c9a52-5d1e-4c2b-9a57-0e6b8f4d2a11".to_string(),
//!     severity: Severity::Warning,
//!     title: "CrashLoop database/pg-0: pg-0 was OOM killed".to_string(),
//!     body: "[WARNING] CrashLoop database/pg-0: pg-0 was OOM killed".to_string(),
//!     inconclusive: false,
//!     context: Default::default(),
//!     timestamp: chrono::Utc::now(),
//! });
//! # }
//! ```
//!
//! # Configuration
//!
//! The notifier is configured via environment variables:
//!
//! - `SLACK_WEBHOOK_URL`: Slack incoming webhook URL (enables the Slack channel)
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Central notification dispatcher.
///
/// The `Notifier` manages multiple notification channels and dispatches
/// events to all enabled channels in a fire-and-forget manner.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a new notifier from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self::disabled();
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let slack = SlackChannel::from_env();
        if slack.enabled() {
            info!("Slack notifications enabled");
            channels.push(Arc::new(slack));
        }

        if channels.is_empty() {
            warn!("No notification channels configured, findings will only be logged");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Send a notification to all enabled channels (fire-and-forget).
    ///
    /// Spawns one task per channel and returns immediately. Errors are
    /// logged, never propagated.
    pub fn notify(&self, event: NotifyEvent) {
        if !self.has_channels() {
            debug!("No active notification channels, skipping event");
            return;
        }

        let event = Arc::new(event);

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let event = Arc::clone(&event);

            tokio::spawn(async move {
                let channel_name = channel.name();

                if !channel.enabled() {
                    debug!(channel = channel_name, "Channel disabled, skipping");
                    return;
                }

                match channel.send(&event).await {
                    Ok(()) => {
                        debug!(channel = channel_name, "Notification sent");
                    }
                    Err(e) => {
                        error!(
                            channel = channel_name,
                            error = %e,
                            "Failed to send notification"
                        );
                    }
                }
            });
        }
    }

    /// Send a notification and wait for all channels to complete.
    ///
    /// Unlike `notify()`, this collects every enabled channel's result.
    pub async fn notify_and_wait(
        &self,
        event: NotifyEvent,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        if !self.has_channels() {
            return vec![];
        }

        let mut results = vec![];

        for channel in self.channels.iter().filter(|c| c.enabled()) {
            let channel_name = channel.name().to_string();
            let result = channel.send(&event).await;
            results.push((channel_name, result));
        }

        results
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        sent: AtomicUsize,
        enabled: bool,
    }

    impl CountingChannel {
        fn new(enabled: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
                enabled,
            })
        }
    }

    #[async_trait]
    impl NotifyChannel for CountingChannel {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, _event: &NotifyEvent) -> Result<(), ChannelError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn finding() -> NotifyEvent {
        NotifyEvent::Finding {
            investigation_id: "inv-1".to_string(),
            severity: Severity::Info,
            title: "Unknown cluster: no clear cause".to_string(),
            body: "[INFO] Unknown cluster".to_string(),
            inconclusive: true,
            context: std::collections::BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_disabled_notifier() {
        let notifier = Notifier::disabled();
        assert!(!notifier.has_channels());
        assert_eq!(notifier.channel_count(), 0);
    }

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Critical.color(), "#dc3545");
        assert_eq!(Severity::Warning.color(), "#ffc107");
        assert_eq!(Severity::Info.color(), "#0d6efd");
        assert_eq!(Severity::Resolved.color(), "#198754");
    }

    #[tokio::test]
    async fn test_notify_and_wait_reaches_every_channel() {
        let channel = CountingChannel::new(true);
        let channels: Vec<Arc<dyn NotifyChannel>> = vec![channel.clone(), channel.clone()];
        let notifier = Notifier::with_channels(channels);

        let results = notifier.notify_and_wait(finding()).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(channel.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_notify_and_wait_skips_unconfigured_channels() {
        let on = CountingChannel::new(true);
        let off = CountingChannel::new(false);
        let channels: Vec<Arc<dyn NotifyChannel>> = vec![on.clone(), off.clone()];
        let notifier = Notifier::with_channels(channels);

        let results = notifier.notify_and_wait(finding()).await;

        assert_eq!(results.len(), 1);
        assert_eq!(on.sent.load(Ordering::SeqCst), 1);
        assert_eq!(off.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_notifier_sends_nothing() {
        let results = Notifier::disabled().notify_and_wait(finding()).await;
        assert!(results.is_empty());
    }
}
