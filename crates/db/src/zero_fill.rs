use std::collections::BTreeMap;

use rusqlite::Connection;
use usage_core::{BatchBound, UsernameFormat};

use crate::error::Result;
use crate::query::{Cte, Fragment, Select, integer, text, values_table};

pub(crate) const NONZERO_CTE: &str = "new_nonzero_usages";
pub(crate) const ZERO_FILL_CTE: &str = "zero_fill";

#[derive(Debug, Clone)]
pub struct ZeroFillResolver {
    users: UsernameFormat,
}

impl ZeroFillResolver {
    pub fn new(users: UsernameFormat) -> Self {
        Self { users }
    }

    pub(crate) fn ctes(
        &self,
        usages: &BTreeMap<String, u64>,
        bound: &BatchBound,
    ) -> Result<Vec<Cte>> {
        Ok(vec![
            self.nonzero_cte(usages)?,
            Cte::new(
                ZERO_FILL_CTE,
                &["username", "total"],
                self.zero_fill_select(bound)?.into_fragment()?,
            ),
        ])
    }

    pub(crate) fn nonzero_cte(&self, usages: &BTreeMap<String, u64>) -> Result<Cte> {
        let mut rows = Vec::with_capacity(usages.len());
        for (username, total) in usages {
            rows.push(vec![text(self.users.qualify(username)), integer(*total)?]);
        }
        Ok(Cte::new(
            NONZERO_CTE,
            &["username", "total"],
            values_table(2, rows)?,
        ))
    }

    fn zero_fill_select(&self, bound: &BatchBound) -> Result<Select> {
        let suffix = self.users.suffix();
        let suffix_len = integer(suffix.chars().count() as u64)?;
        Ok(Select::new()
            .distinct()
            .columns(&["us.username", "0"])
            .from("user_data_usage AS udu")
            .join("users AS us ON us.id = udu.user_id")
            .left_join("new_nonzero_usages AS nn ON nn.username = us.username")
            .filter(Fragment::raw("nn.username IS NULL"))
            .filter(Fragment::raw("udu.total > 0"))
            .filter(Fragment::new(
                "substr(us.username, -?) = ?",
                [suffix_len.clone(), text(suffix.as_str())],
            ))
            .filter(Fragment::new(
                "substr(us.username, 1, length(us.username) - ?) BETWEEN ? AND ?",
                [
                    suffix_len,
                    text(self.users.unqualify(&bound.start)),
                    text(self.users.unqualify(&bound.end)),
                ],
            ))
            .filter(Fragment::raw(
                "udu.time = (SELECT MAX(u2.time) FROM user_data_usage AS u2 \
                 WHERE u2.user_id = udu.user_id)",
            )))
    }

    pub fn resolve(
        &self,
        conn: &Connection,
        usages: &BTreeMap<String, u64>,
        bound: &BatchBound,
    ) -> Result<Vec<String>> {
        let mut select = Select::new()
            .column("username")
            .from(ZERO_FILL_CTE)
            .order_by("username");
        for cte in self.ctes(usages, bound)? {
            select = select.with(cte);
        }
        let query = select.build()?;
        tracing::trace!(sql = %query.sql, "zero fill query");
        let mut stmt = conn.prepare(&query.sql)?;
        let rows = stmt.query_map(query.bind(), |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
