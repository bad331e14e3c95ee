mod catalog;
mod error;
mod helpers;
mod migrations;
mod partition;
mod pool;
pub mod query;
mod record;
mod types;
mod zero_fill;

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

pub use catalog::UsageAggregator;
pub use error::{DbError, Result};
pub use helpers::{format_timestamp, parse_timestamp};
pub use migrations::{install_catalog_schema, migrate_record_store};
pub use partition::BatchPartitioner;
pub use pool::{Pool, PoolSettings, PoolStats, PooledConnection};
pub use record::{ReconciliationWriter, latest_usage, usage_history};
pub use types::{BUNDLE_RESOURCE, CatalogSettings, EMPTY_RESOURCE_HOST};
pub use zero_fill::ZeroFillResolver;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a store file with the pragmas every pooled connection shares.
pub fn open_connection(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", -20_000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}
