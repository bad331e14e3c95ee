use std::sync::Arc;

use tokio::sync::mpsc;
use usage_core::{BatchBound, Trigger, UsageRecord};

use crate::engine::ReconciliationEngine;
use crate::error::Result;
use crate::events::OutboundEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Partitioned(Vec<BatchBound>),
    Batch(Vec<UsageRecord>),
    User(UsageRecord),
}

#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<ReconciliationEngine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub async fn dispatch(&self, trigger: Trigger) -> Result<DispatchOutcome> {
        match trigger {
            Trigger::PartitionAll => self.engine.partition_all().await.map(DispatchOutcome::Partitioned),
            Trigger::ReconcileBatch(bound) => self
                .engine
                .reconcile_batch(&bound.start, &bound.end)
                .await
                .map(DispatchOutcome::Batch),
            Trigger::ReconcileUser(username) => self
                .engine
                .reconcile_user(&username)
                .await
                .map(DispatchOutcome::User),
        }
    }

    pub async fn dispatch_key(&self, routing_key: &str) -> Result<DispatchOutcome> {
        let trigger = Trigger::parse(routing_key)?;
        self.dispatch(trigger).await
    }

    /// Drains `receiver` until every sender is gone, handling each trigger on
    /// its own task. Failures are logged; redelivery is the sender's concern.
    pub async fn run(self, mut receiver: mpsc::Receiver<OutboundEvent>) {
        while let Some(event) = receiver.recv().await {
            match event {
                OutboundEvent::Trigger(trigger) => {
                    let dispatcher = self.clone();
                    tokio::spawn(async move {
                        let routing_key = trigger.routing_key();
                        match dispatcher.dispatch(trigger).await {
                            Ok(outcome) => tracing::debug!(%routing_key, ?outcome, "trigger handled"),
                            Err(err) => tracing::error!(%routing_key, error = %err, "trigger failed"),
                        }
                    });
                }
                OutboundEvent::UsageChanged(event) => {
                    tracing::info!(
                        username = %event.username,
                        value = %event.value,
                        unit = %event.unit,
                        "usage changed"
                    );
                }
            }
        }
        tracing::debug!("dispatch channel closed");
    }
}
