//! Chat destinations for findings.

pub mod slack;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::NotifyEvent;

/// A place findings are posted to.
///
/// [`Notifier`](crate::Notifier) skips channels whose `enabled` is false, so
/// an unconfigured channel can stay registered.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Short name used in logs and delivery results
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool;

    /// Post one event. A single attempt; retrying is left to the caller.
    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError>;
}
