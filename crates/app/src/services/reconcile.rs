use usage_core::{BatchBound, UsageRecord};

use crate::error::{AppError, Result};
use crate::services::{SharedEngine, require_username};

#[derive(Clone)]
pub struct ReconcileService {
    engine: SharedEngine,
}

impl ReconcileService {
    pub(super) fn new(engine: SharedEngine) -> Self {
        Self { engine }
    }

    pub async fn user(&self, username: &str) -> Result<UsageRecord> {
        let username = require_username(username)?;
        Ok(self.engine.reconcile_user(username).await?)
    }

    pub async fn batch(&self, start: &str, end: &str) -> Result<Vec<UsageRecord>> {
        let start = require_username(start)?;
        let end = require_username(end)?;
        let users = self.engine.users();
        if users.unqualify(start) > users.unqualify(end) {
            return Err(AppError::InvalidInput(format!(
                "batch start {} sorts after end {}",
                start, end
            )));
        }
        Ok(self.engine.reconcile_batch(start, end).await?)
    }

    /// Uses `batch_size` verbatim when given, else the configured (jittered) size.
    pub async fn partition(&self, batch_size: Option<u64>) -> Result<Vec<BatchBound>> {
        let bounds = match batch_size {
            Some(0) => {
                return Err(AppError::InvalidInput("batch size must be positive".to_string()));
            }
            Some(size) => self.engine.partition_users(size).await?,
            None => self.engine.partition_all().await?,
        };
        Ok(bounds)
    }
}
