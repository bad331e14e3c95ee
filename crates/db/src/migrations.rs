use rusqlite::Connection;

use crate::error::Result;

const MIGRATION_0001: &str = include_str!("../migrations/0001_users.sql");
const MIGRATION_0002: &str = include_str!("../migrations/0002_user_data_usage.sql");
const CATALOG_SCHEMA: &str = include_str!("../migrations/catalog_schema.sql");

const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_users", MIGRATION_0001),
    ("0002_user_data_usage", MIGRATION_0002),
];

pub fn migrate_record_store(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    for (name, sql) in MIGRATIONS {
        tracing::debug!(migration = name, "applying migration");
        tx.execute_batch(sql)?;
    }
    tx.commit()?;
    Ok(())
}

pub fn install_catalog_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(CATALOG_SCHEMA)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
