use std::path::Path;

use usage_db::{install_catalog_schema, migrate_record_store, open_connection};

use crate::config::AppConfig;
use crate::Result;

pub fn ensure_store_dirs(config: &AppConfig) -> Result<()> {
    for path in [&config.record.path, &config.catalog.path] {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn setup_record_store(path: &Path) -> Result<()> {
    let mut conn = open_connection(path)?;
    migrate_record_store(&mut conn)?;
    Ok(())
}

pub fn setup_catalog_fixture(path: &Path) -> Result<()> {
    let mut conn = open_connection(path)?;
    install_catalog_schema(&mut conn)?;
    Ok(())
}
