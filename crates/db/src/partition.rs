use std::collections::BTreeMap;

use rusqlite::Connection;
use usage_core::{BatchBound, pair_bounds};

use crate::error::{DbError, Result};
use crate::query::{Cte, Fragment, Select, integer, text};
use crate::types::CatalogSettings;

/// Splits the catalog's regular users into contiguous username batches.
#[derive(Debug, Clone)]
pub struct BatchPartitioner {
    zone: String,
    user_type: String,
}

impl BatchPartitioner {
    pub fn new(settings: &CatalogSettings) -> Self {
        Self {
            zone: settings.zone.clone(),
            user_type: settings.user_type.clone(),
        }
    }

    pub fn compute_batches(&self, conn: &Connection, batch_size: u64) -> Result<Vec<BatchBound>> {
        if batch_size == 0 {
            return Err(DbError::Query("batch size must be positive".to_string()));
        }
        let size = integer(batch_size)?;
        let query = Select::new()
            .with(Cte::new(
                "ranked",
                &["n", "user_name"],
                Fragment::new(
                    "SELECT row_number() OVER (ORDER BY user_name), user_name \
                     FROM (SELECT DISTINCT user_name FROM r_user_main \
                     WHERE user_type_name = ? AND zone_name = ?)",
                    [text(self.user_type.as_str()), text(self.zone.as_str())],
                ),
            ))
            .columns(&["n", "user_name"])
            .from("ranked")
            .filter(Fragment::new(
                "n % ? = 0 OR (n - 1) % ? = 0",
                [size.clone(), size],
            ))
            .union_all(
                Select::new()
                    .columns(&["max(n)", "max(user_name)"])
                    .from("ranked"),
            )
            .build()?;
        tracing::trace!(sql = %query.sql, "batch bounds query");

        let mut stmt = conn.prepare(&query.sql)?;
        let mut rows = stmt.query(query.bind())?;
        let mut boundaries = BTreeMap::new();
        let mut max_rank = 0u64;
        while let Some(row) = rows.next()? {
            let rank: Option<i64> = row.get(0)?;
            let username: Option<String> = row.get(1)?;
            if let (Some(rank), Some(username)) = (rank, username) {
                let rank = rank.max(0) as u64;
                max_rank = max_rank.max(rank);
                boundaries.insert(rank, username);
            }
        }
        let bounds = pair_bounds(&boundaries, max_rank, batch_size);
        tracing::debug!(
            users = max_rank,
            batch_size,
            batches = bounds.len(),
            "computed batch bounds"
        );
        Ok(bounds)
    }
}
