//! Slack webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Environment variable for Slack webhook URL.
const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

/// Slack limits header text to 150 characters.
const MAX_HEADER_CHARS: usize = 150;

/// Slack limits section text to 3000 characters.
const MAX_SECTION_CHARS: usize = 3000;

/// Slack webhook notification channel.
pub struct SlackChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a new Slack channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_SLACK_WEBHOOK_URL)
            .ok()
            .filter(|url| !url.trim().is_empty());

        if webhook_url.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a Slack channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url: Some(webhook_url),
            client: reqwest::Client::new(),
        }
    }

    /// Format an event as a Slack webhook payload using Block Kit.
    fn format_payload(event: &NotifyEvent) -> SlackPayload {
        let severity = event.severity();
        let title = truncate(
            &format!("{} {}", severity.emoji(), event.title()),
            MAX_HEADER_CHARS,
        );

        let blocks = vec![
            SlackBlock::Header {
                text: SlackText::plain(title),
            },
            SlackBlock::Section {
                text: SlackText::mrkdwn(truncate(&event.body(), MAX_SECTION_CHARS)),
            },
            SlackBlock::Context {
                elements: vec![SlackText::mrkdwn(format!(
                    "*Severity:* {} | *Source:* Sentinel | {}",
                    severity.as_str(),
                    event.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
                ))],
            },
        ];

        SlackPayload {
            text: event.title(),
            attachments: vec![SlackAttachment {
                color: severity.color(),
                blocks,
            }],
        }
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_SLACK_WEBHOOK_URL.to_string()))?;

        let payload = Self::format_payload(event);

        debug!(channel = "slack", title = %event.title(), "Sending notification");

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!(channel = "slack", "Notification sent successfully");
            Ok(())
        } else if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);

            warn!(
                channel = "slack",
                retry_after_secs = retry_after,
                "Rate limited by Slack"
            );

            Err(ChannelError::RateLimited {
                retry_after_secs: retry_after,
            })
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack webhook request failed"
            );

            Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

// =============================================================================
// Slack API types (Block Kit)
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    /// Fallback text for notifications
    text: String,
    /// Attachments (for color strip)
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    /// Hex color for the attachment strip
    color: &'static str,
    /// Block Kit blocks
    blocks: Vec<SlackBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SlackBlock {
    Header { text: SlackText },
    Section { text: SlackText },
    Context { elements: Vec<SlackText> },
}

#[derive(Debug, Serialize)]
struct SlackText {
    #[serde(rename = "type")]
    text_type: &'static str,
    text: String,
}

impl SlackText {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text_type: "plain_text",
            text: text.into(),
        }
    }

    fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            text_type: "mrkdwn",
            text: text.into(),
        }
    }
}

/// Truncate on a char boundary, marking the cut with an ellipsis.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn finding(severity: Severity) -> NotifyEvent {
        NotifyEvent::Finding {
            investigation_id: "inv-1".to_string(),
            severity,
            title: "CrashLoop database/x: OOM kill detected".to_string(),
            body: "[WARNING] CrashLoop database/x: OOM kill detected".to_string(),
            inconclusive: false,
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_slack_payload_format() {
        let payload = SlackChannel::format_payload(&finding(Severity::Warning));
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["text"], "CrashLoop database/x: OOM kill detected");
        assert_eq!(value["attachments"][0]["color"], "#ffc107");
        assert_eq!(value["attachments"][0]["blocks"][0]["type"], "header");
        assert_eq!(
            value["attachments"][0]["blocks"][0]["text"]["type"],
            "plain_text"
        );
        assert!(value["attachments"][0]["blocks"][2]["elements"][0]["text"]
            .as_str()
            .unwrap()
            .contains("*Severity:* WARNING"));
    }

    #[test]
    fn test_header_is_truncated() {
        let long = "x".repeat(400);
        let out = truncate(&long, MAX_HEADER_CHARS);
        assert_eq!(out.chars().count(), MAX_HEADER_CHARS);
        assert!(out.ends_with('…'));
    }

    #[tokio::test]
    async fn test_send_posts_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = SlackChannel::new(format!("{}/hook", server.uri()));
        channel.send(&finding(Severity::Critical)).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
            .mount(&server)
            .await;

        let channel = SlackChannel::new(server.uri());
        let err = channel.send(&finding(Severity::Warning)).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Rejected { status: 404, ref body } if body == "no_service"
        ));
    }

    #[tokio::test]
    async fn test_send_reports_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let channel = SlackChannel::new(server.uri());
        let err = channel.send(&finding(Severity::Info)).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::RateLimited {
                retry_after_secs: 12
            }
        ));
    }
}
