use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use usage_core::{BatchBound, UsageRecord, UsernameFormat};

use crate::error::{DbError, Result};
use crate::helpers::{USAGE_RECORD_COLUMNS, format_timestamp, row_to_usage_record};
use crate::query::{Cte, Fragment, Insert, Select, integer, text};
use crate::zero_fill::{NONZERO_CTE, ZERO_FILL_CTE, ZeroFillResolver};

/// Appends usage rows to the system-of-record. Never updates or deletes.
#[derive(Debug, Clone)]
pub struct ReconciliationWriter {
    users: UsernameFormat,
    zero_fill: ZeroFillResolver,
}

impl ReconciliationWriter {
    pub fn new(users: UsernameFormat) -> Self {
        Self {
            zero_fill: ZeroFillResolver::new(users.clone()),
            users,
        }
    }

    pub fn zero_fill(&self) -> &ZeroFillResolver {
        &self.zero_fill
    }

    pub fn record_usage(
        &self,
        conn: &Connection,
        username: &str,
        total: u64,
        measured_at: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>> {
        let username = self.users.qualify(username);
        tracing::trace!(username = %username, total, %measured_at, "inserting usage");
        let query = Insert::new("user_data_usage", &["total", "time", "user_id"])
            .select(
                Select::new()
                    .column_expr(Fragment::new("?", [integer(total)?]))
                    .column_expr(Fragment::new("?", [text(format_timestamp(&measured_at))]))
                    .column("u.id")
                    .from("users AS u")
                    .filter(Fragment::new("u.username = ?", [text(username.as_str())])),
            )
            .returning(&["id"])
            .build()?;
        let id: Option<String> = conn
            .query_row(&query.sql, query.bind(), |row| row.get(0))
            .optional()?;
        match id {
            Some(id) => load_usage_record(conn, &id),
            None => Ok(None),
        }
    }

    pub fn ensure_users(&self, conn: &Connection, usernames: &[String]) -> Result<usize> {
        let unique: BTreeSet<&String> = usernames.iter().collect();
        if unique.is_empty() {
            return Ok(0);
        }
        let mut insert = Insert::new("users", &["username"]);
        for username in unique {
            if !self.users.is_qualified(username) {
                return Err(DbError::InvalidUsername(format!(
                    "{} is not domain-qualified",
                    username
                )));
            }
            insert = insert.values(vec![text(username.as_str())]);
        }
        let query = insert
            .on_conflict("ON CONFLICT (username) DO NOTHING")
            .build()?;
        tracing::trace!(sql = %query.sql, "ensuring users");
        Ok(conn.execute(&query.sql, query.bind())?)
    }

    pub fn record_usage_batch(
        &self,
        conn: &Connection,
        usages: &BTreeMap<String, u64>,
        measured_at: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        self.insert_batch(conn, usages, None, measured_at)
    }

    pub fn record_usage_batch_with_zero_fill(
        &self,
        conn: &Connection,
        usages: &BTreeMap<String, u64>,
        bound: &BatchBound,
        measured_at: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        self.insert_batch(conn, usages, Some(bound), measured_at)
    }

    fn insert_batch(
        &self,
        conn: &Connection,
        usages: &BTreeMap<String, u64>,
        bound: Option<&BatchBound>,
        measured_at: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        let usages: BTreeMap<String, u64> = usages
            .iter()
            .map(|(username, total)| (self.users.qualify(username), *total))
            .collect();
        let usernames: Vec<String> = usages.keys().cloned().collect();
        self.ensure_users(conn, &usernames)?;
        if usages.is_empty() && bound.is_none() {
            return Ok(Vec::new());
        }

        let ctes = match bound {
            Some(bound) => self.zero_fill.ctes(&usages, bound)?,
            None => vec![self.zero_fill.nonzero_cte(&usages)?],
        };
        let mut new_usages = Select::new()
            .columns(&["username", "total"])
            .from(NONZERO_CTE);
        if bound.is_some() {
            new_usages = new_usages.union_all(
                Select::new()
                    .columns(&["username", "total"])
                    .from(ZERO_FILL_CTE),
            );
        }

        let mut insert = Insert::new("user_data_usage", &["total", "time", "user_id"]);
        for cte in ctes {
            insert = insert.with(cte);
        }
        let query = insert
            .with(Cte::new(
                "new_usages",
                &["username", "total"],
                new_usages.into_fragment()?,
            ))
            .select(
                Select::new()
                    .column("nu.total")
                    .column_expr(Fragment::new("?", [text(format_timestamp(&measured_at))]))
                    .column("u.id")
                    .from("users AS u")
                    .join("new_usages AS nu ON nu.username = u.username"),
            )
            .returning(&["id"])
            .build()?;
        tracing::trace!(sql = %query.sql, "inserting usage batch");

        let ids = {
            let mut stmt = conn.prepare(&query.sql)?;
            let rows = stmt.query_map(query.bind(), |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = load_usage_record(conn, &id)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(records)
    }
}

fn usage_record_select() -> Select {
    Select::new()
        .columns(USAGE_RECORD_COLUMNS)
        .from("user_data_usage AS d")
        .join("users AS u ON d.user_id = u.id")
}

fn load_usage_record(conn: &Connection, id: &str) -> Result<Option<UsageRecord>> {
    let query = usage_record_select()
        .filter(Fragment::new("d.id = ?", [text(id)]))
        .build()?;
    Ok(conn
        .query_row(&query.sql, query.bind(), row_to_usage_record)
        .optional()?)
}

pub fn latest_usage(conn: &Connection, username: &str) -> Result<Option<UsageRecord>> {
    let query = usage_record_select()
        .filter(Fragment::new("u.username = ?", [text(username)]))
        .order_by("d.time DESC")
        .order_by("d.last_modified DESC")
        .limit(1)
        .build()?;
    tracing::trace!(sql = %query.sql, username, "latest usage query");
    Ok(conn
        .query_row(&query.sql, query.bind(), row_to_usage_record)
        .optional()?)
}

pub fn usage_history(conn: &Connection, username: &str) -> Result<Vec<UsageRecord>> {
    let query = usage_record_select()
        .filter(Fragment::new("u.username = ?", [text(username)]))
        .order_by("d.time ASC")
        .order_by("d.last_modified ASC")
        .build()?;
    let mut stmt = conn.prepare(&query.sql)?;
    let rows = stmt.query_map(query.bind(), row_to_usage_record)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}
