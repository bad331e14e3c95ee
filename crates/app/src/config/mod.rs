use std::path::{Path, PathBuf};
use std::time::Duration;

use reconcile::EngineSettings;
use serde::{Deserialize, Serialize};
use usage_core::UsernameFormat;
use usage_db::{CatalogSettings, PoolSettings};

use crate::error::{AppError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/data-usage/config.toml";
const DEFAULT_PORT: u16 = 60000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub path: PathBuf,
    pub max_connections: usize,
    pub max_idle_secs: u64,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/data-usage/record.sqlite"),
            max_connections: 10,
            max_idle_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
    pub zone: String,
    pub root_resources: Vec<String>,
    pub trash_service_accounts: Vec<String>,
    pub user_type: String,
    pub max_connections: usize,
    pub max_idle_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let catalog = CatalogSettings::default();
        Self {
            path: PathBuf::from("/var/lib/data-usage/catalog.sqlite"),
            zone: catalog.zone,
            root_resources: catalog.root_resources,
            trash_service_accounts: catalog.trash_service_accounts,
            user_type: catalog.user_type,
            max_connections: 10,
            max_idle_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    pub domain: String,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            domain: "example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub batch_size: u64,
    pub batch_jitter: bool,
    pub refresh_interval_secs: u64,
    pub single_user_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    pub partition_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            batch_size: engine.batch_size,
            batch_jitter: engine.batch_jitter,
            refresh_interval_secs: engine.refresh_interval.as_secs(),
            single_user_timeout_secs: engine.single_user_timeout.as_secs(),
            batch_timeout_secs: engine.batch_timeout.as_secs(),
            partition_timeout_secs: engine.partition_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub record: RecordConfig,
    pub catalog: CatalogConfig,
    pub users: UsersConfig,
    pub reconcile: ReconcileConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("read config {}: {}", path.display(), err)))?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.record.path.as_os_str().is_empty() {
            return Err(invalid("record.path must be set"));
        }
        if self.catalog.path.as_os_str().is_empty() {
            return Err(invalid("catalog.path must be set"));
        }
        if self.catalog.zone.trim().is_empty() {
            return Err(invalid("catalog.zone must be set"));
        }
        if self.catalog.user_type.trim().is_empty() {
            return Err(invalid("catalog.user_type must be set"));
        }
        if self.catalog.root_resources.iter().all(|name| name.trim().is_empty()) {
            return Err(invalid("catalog.root_resources must name at least one resource"));
        }
        if self.users.domain.trim_matches('@').trim().is_empty() {
            return Err(invalid("users.domain must be set"));
        }
        if self.reconcile.batch_size == 0 {
            return Err(invalid("reconcile.batch_size must be positive"));
        }
        if self.record.max_connections == 0 || self.catalog.max_connections == 0 {
            return Err(invalid("max_connections must be positive"));
        }
        Ok(())
    }

    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            zone: self.catalog.zone.clone(),
            root_resources: self
                .catalog
                .root_resources
                .iter()
                .filter(|name| !name.trim().is_empty())
                .cloned()
                .collect(),
            trash_service_accounts: self.catalog.trash_service_accounts.clone(),
            user_type: self.catalog.user_type.clone(),
        }
    }

    pub fn catalog_pool(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.catalog.max_connections,
            max_idle: Duration::from_secs(self.catalog.max_idle_secs),
        }
    }

    pub fn record_pool(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.record.max_connections,
            max_idle: Duration::from_secs(self.record.max_idle_secs),
        }
    }

    pub fn usernames(&self) -> UsernameFormat {
        UsernameFormat::new(&self.users.domain)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            batch_size: self.reconcile.batch_size,
            batch_jitter: self.reconcile.batch_jitter,
            refresh_interval: Duration::from_secs(self.reconcile.refresh_interval_secs),
            single_user_timeout: Duration::from_secs(self.reconcile.single_user_timeout_secs),
            batch_timeout: Duration::from_secs(self.reconcile.batch_timeout_secs),
            partition_timeout: Duration::from_secs(self.reconcile.partition_timeout_secs),
        }
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(message.to_string())
}
