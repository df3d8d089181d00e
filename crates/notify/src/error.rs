//! Delivery failures.

use thiserror::Error;

/// Why a channel could not deliver an event.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The channel has no destination; carries the env var that would set it
    #[error("channel not configured ({0} is unset)")]
    NotConfigured(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The webhook answered with a non-success status
    #[error("webhook rejected the message with {status}: {body}")]
    Rejected { status: u16, body: String },
}
