mod reconcile;
mod usage;

use std::sync::Arc;

use ::reconcile::ReconciliationEngine;

use crate::error::{AppError, Result};

pub use self::reconcile::ReconcileService;
pub use usage::UsageService;

type SharedEngine = Arc<ReconciliationEngine>;

/// Service registry for app-level operations.
#[derive(Clone)]
pub struct AppServices {
    pub usage: UsageService,
    pub reconcile: ReconcileService,
}

impl AppServices {
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            usage: UsageService::new(engine.clone()),
            reconcile: ReconcileService::new(engine),
        }
    }
}

fn require_username(username: &str) -> Result<&str> {
    let trimmed = username.trim();
    if trimmed.is_empty() || trimmed.starts_with('@') || trimmed.contains('/') {
        return Err(AppError::InvalidInput(format!("invalid username {:?}", username)));
    }
    Ok(trimmed)
}
