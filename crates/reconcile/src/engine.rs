use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::instrument;
use usage_core::{BatchBound, Trigger, UsageChanged, UsageRecord, UsernameFormat};
use usage_db::{BatchPartitioner, CatalogSettings, ReconciliationWriter, UsageAggregator, latest_usage};

use crate::coordinator::TransactionCoordinator;
use crate::error::{ReconcileError, Result};
use crate::events::EventPublisher;

pub const BATCH_JITTER: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub batch_size: u64,
    pub batch_jitter: bool,
    pub refresh_interval: Duration,
    pub single_user_timeout: Duration,
    pub batch_timeout: Duration,
    pub partition_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_jitter: true,
            refresh_interval: Duration::from_secs(3 * 60 * 60),
            single_user_timeout: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(300),
            partition_timeout: Duration::from_secs(60),
        }
    }
}

/// Applies a uniform `[-BATCH_JITTER, BATCH_JITTER]` offset, never going below one.
pub fn jitter_batch_size<R: Rng>(base: u64, rng: &mut R) -> u64 {
    let delta = rng.gen_range(-BATCH_JITTER..=BATCH_JITTER);
    let size = i64::try_from(base).unwrap_or(i64::MAX).saturating_add(delta);
    size.max(1) as u64
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    coordinator: TransactionCoordinator,
    aggregator: UsageAggregator,
    partitioner: BatchPartitioner,
    writer: ReconciliationWriter,
    users: UsernameFormat,
    publisher: Arc<dyn EventPublisher>,
    settings: EngineSettings,
}

impl ReconciliationEngine {
    pub fn new(
        coordinator: TransactionCoordinator,
        catalog: CatalogSettings,
        users: UsernameFormat,
        publisher: Arc<dyn EventPublisher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            coordinator,
            partitioner: BatchPartitioner::new(&catalog),
            aggregator: UsageAggregator::new(catalog),
            writer: ReconciliationWriter::new(users.clone()),
            users,
            publisher,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn users(&self) -> &UsernameFormat {
        &self.users
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    #[instrument(skip(self))]
    pub async fn reconcile_user(&self, username: &str) -> Result<UsageRecord> {
        let qualified = self.users.qualify(username);
        let bare = self.users.unqualify(&qualified).to_string();
        let aggregator = self.aggregator.clone();
        let writer = self.writer.clone();
        let measured_at = Utc::now();

        let record = self
            .coordinator
            .run(
                "reconcile_user",
                self.settings.single_user_timeout,
                move |conn| aggregator.current_usage(conn, &bare),
                move |conn, usage| {
                    let total = usage.unwrap_or_else(|| {
                        tracing::debug!(username = %qualified, "no catalog content, recording zero");
                        0
                    });
                    writer
                        .record_usage(conn, &qualified, total, measured_at)
                        .map_err(ReconcileError::WriteFailed)?
                        .ok_or_else(|| ReconcileError::UserNotFound(qualified.clone()))
                },
            )
            .await?;
        tracing::info!(username = %record.username, total = record.total, "reconciled user");
        self.announce(std::slice::from_ref(&record)).await;
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn reconcile_batch(&self, start: &str, end: &str) -> Result<Vec<UsageRecord>> {
        let bound = BatchBound::new(self.users.unqualify(start), self.users.unqualify(end));
        let aggregator = self.aggregator.clone();
        let writer = self.writer.clone();
        let users = self.users.clone();
        let read_bound = bound.clone();
        let measured_at = Utc::now();

        let records = self
            .coordinator
            .run(
                "reconcile_batch",
                self.settings.batch_timeout,
                move |conn| aggregator.current_usage_batch(conn, &read_bound.start, &read_bound.end),
                move |conn, usages| {
                    let qualified: BTreeMap<String, u64> = usages
                        .into_iter()
                        .map(|(username, total)| (users.qualify(&username), total))
                        .collect();
                    writer
                        .record_usage_batch_with_zero_fill(conn, &qualified, &bound, measured_at)
                        .map_err(ReconcileError::WriteFailed)
                },
            )
            .await?;
        tracing::info!(start, end, users = records.len(), "reconciled batch");
        self.announce(&records).await;
        Ok(records)
    }

    pub async fn partition_all(&self) -> Result<Vec<BatchBound>> {
        let batch_size = if self.settings.batch_jitter {
            jitter_batch_size(self.settings.batch_size, &mut rand::thread_rng())
        } else {
            self.settings.batch_size
        };
        self.partition_users(batch_size).await
    }

    /// Computes batch bounds and publishes one batch trigger per bound.
    ///
    /// Every bound is published even if some publishes fail; the first
    /// failure is returned afterwards.
    #[instrument(skip(self))]
    pub async fn partition_users(&self, batch_size: u64) -> Result<Vec<BatchBound>> {
        let partitioner = self.partitioner.clone();
        let bounds = self
            .coordinator
            .read_catalog("partition_users", self.settings.partition_timeout, move |conn| {
                partitioner.compute_batches(conn, batch_size)
            })
            .await?;
        tracing::info!(batch_size, batches = bounds.len(), "partitioned users");

        let mut first_error = None;
        for bound in &bounds {
            let trigger = Trigger::ReconcileBatch(bound.clone());
            if let Err(err) = self.publisher.publish_trigger(&trigger).await {
                tracing::error!(routing_key = %trigger.routing_key(), error = %err, "batch publish failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(bounds),
        }
    }

    pub async fn current_usage(&self, username: &str) -> Result<UsageRecord> {
        let qualified = self.users.qualify(username);
        let lookup = qualified.clone();
        self.coordinator
            .read_record("current_usage", self.settings.single_user_timeout, move |conn| {
                latest_usage(conn, &lookup)
            })
            .await?
            .ok_or(ReconcileError::NotFound(qualified))
    }

    #[instrument(skip(self))]
    pub async fn lookup_current_usage(&self, username: &str) -> Result<UsageRecord> {
        match self.current_usage(username).await {
            Ok(record) => {
                let age = Utc::now().signed_duration_since(record.measured_at);
                let stale = age
                    .to_std()
                    .map(|age| age > self.settings.refresh_interval)
                    .unwrap_or(false);
                if stale {
                    tracing::debug!(username = %record.username, measured_at = %record.measured_at, "stale usage, scheduling refresh");
                    self.schedule_refresh(&record.username).await;
                }
                Ok(record)
            }
            Err(ReconcileError::NotFound(qualified)) => {
                tracing::debug!(username = %qualified, "no usage recorded, scheduling refresh");
                self.schedule_refresh(&qualified).await;
                Err(ReconcileError::NotFound(qualified))
            }
            Err(err) => Err(err),
        }
    }

    async fn schedule_refresh(&self, qualified: &str) {
        let trigger = Trigger::ReconcileUser(self.users.unqualify(qualified).to_string());
        if let Err(err) = self.publisher.publish_trigger(&trigger).await {
            tracing::warn!(routing_key = %trigger.routing_key(), error = %err, "refresh publish failed");
        }
    }

    async fn announce(&self, records: &[UsageRecord]) {
        for record in records {
            let event = UsageChanged::from(record);
            if let Err(err) = self.publisher.publish_usage_changed(&event).await {
                tracing::error!(username = %record.username, error = %err, "usage publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn jitter_stays_within_two_of_base() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let size = jitter_batch_size(100, &mut rng);
            assert!((98..=102).contains(&size));
        }
    }

    #[test]
    fn jitter_never_reaches_zero() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            assert!(jitter_batch_size(1, &mut rng) >= 1);
        }
    }
}
