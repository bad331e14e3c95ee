pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod services;
pub mod startup;

pub use app::AppState;
pub use config::{AppConfig, DEFAULT_CONFIG_PATH};
pub use error::{ApiError, AppError, Result};
pub use services::{AppServices, ReconcileService, UsageService};
pub use startup::{ensure_store_dirs, setup_catalog_fixture, setup_record_store};
