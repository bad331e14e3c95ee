use std::sync::Arc;

use reconcile::{Dispatcher, EventPublisher, ReconciliationEngine, TransactionCoordinator};
use usage_db::Pool;

use crate::config::AppConfig;
use crate::error::Result;
use crate::services::AppServices;
use crate::startup;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<ReconciliationEngine>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(config: AppConfig, publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        config.validate()?;
        let coordinator = TransactionCoordinator::new(
            Pool::open("catalog", config.catalog.path.clone(), config.catalog_pool()),
            Pool::open("record", config.record.path.clone(), config.record_pool()),
        );
        let engine = Arc::new(ReconciliationEngine::new(
            coordinator,
            config.catalog_settings(),
            config.usernames(),
            publisher,
            config.engine_settings(),
        ));
        let services = AppServices::new(engine.clone());
        Ok(Self {
            config: Arc::new(config),
            engine,
            services,
        })
    }

    pub fn initialize(&self) -> Result<()> {
        startup::ensure_store_dirs(&self.config)?;
        startup::setup_record_store(&self.config.record.path)?;
        tracing::info!(
            record = %self.config.record.path.display(),
            catalog = %self.config.catalog.path.display(),
            "stores ready"
        );
        Ok(())
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.engine.clone())
    }

    pub fn close(&self) {
        let coordinator = self.engine.coordinator();
        coordinator.catalog_pool().close();
        coordinator.record_pool().close();
    }
}
