use async_trait::async_trait;
use tokio::sync::mpsc;
use usage_core::{Trigger, UsageChanged};

use crate::error::{ReconcileError, Result};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_trigger(&self, trigger: &Trigger) -> Result<()>;

    async fn publish_usage_changed(&self, event: &UsageChanged) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Trigger(Trigger),
    UsageChanged(UsageChanged),
}

/// Publishes onto an in-process channel drained by a dispatch worker.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<OutboundEvent>,
}

impl ChannelPublisher {
    pub fn new(sender: mpsc::Sender<OutboundEvent>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }

    async fn send(&self, event: OutboundEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|err| ReconcileError::Publish(format!("channel closed: {:?}", err.0)))
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish_trigger(&self, trigger: &Trigger) -> Result<()> {
        self.send(OutboundEvent::Trigger(trigger.clone())).await
    }

    async fn publish_usage_changed(&self, event: &UsageChanged) -> Result<()> {
        self.send(OutboundEvent::UsageChanged(event.clone())).await
    }
}

/// Emits events as log lines only; used by one-shot commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish_trigger(&self, trigger: &Trigger) -> Result<()> {
        tracing::info!(routing_key = %trigger.routing_key(), "trigger");
        Ok(())
    }

    async fn publish_usage_changed(&self, event: &UsageChanged) -> Result<()> {
        let payload =
            serde_json::to_string(event).map_err(|err| ReconcileError::Publish(err.to_string()))?;
        tracing::info!(username = %event.username, %payload, "usage changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_publisher_forwards_events() {
        let (publisher, mut receiver) = ChannelPublisher::channel(4);
        publisher
            .publish_trigger(&Trigger::ReconcileUser("alice".to_string()))
            .await
            .expect("publish");
        assert_eq!(
            receiver.recv().await,
            Some(OutboundEvent::Trigger(Trigger::ReconcileUser("alice".to_string())))
        );
    }

    #[tokio::test]
    async fn closed_channel_is_a_publish_error() {
        let (publisher, receiver) = ChannelPublisher::channel(1);
        drop(receiver);
        let err = publisher
            .publish_trigger(&Trigger::PartitionAll)
            .await
            .expect_err("closed");
        assert!(matches!(err, ReconcileError::Publish(_)));
    }
}
