use usage_core::UsageRecord;
use usage_db::usage_history;

use crate::error::Result;
use crate::services::{SharedEngine, require_username};

#[derive(Clone)]
pub struct UsageService {
    engine: SharedEngine,
}

impl UsageService {
    pub(super) fn new(engine: SharedEngine) -> Self {
        Self { engine }
    }

    /// Latest record; missing or stale records schedule a refresh.
    pub async fn current(&self, username: &str) -> Result<UsageRecord> {
        let username = require_username(username)?;
        Ok(self.engine.lookup_current_usage(username).await?)
    }

    pub async fn history(&self, username: &str) -> Result<Vec<UsageRecord>> {
        let qualified = self.engine.users().qualify(require_username(username)?);
        let timeout = self.engine.settings().single_user_timeout;
        Ok(self
            .engine
            .coordinator()
            .read_record("usage_history", timeout, move |conn| {
                usage_history(conn, &qualified)
            })
            .await?)
    }
}
