use rusqlite::{Connection, OptionalExtension};
use rusqlite::types::Value;
use usage_core::AggregatedUsage;

use crate::error::Result;
use crate::query::{Cte, Fragment, Insert, Select, any_of, in_list, integer, text};
use crate::types::{BUNDLE_RESOURCE, CatalogSettings, EMPTY_RESOURCE_HOST};

#[derive(Debug, Clone)]
pub struct UsageAggregator {
    settings: CatalogSettings,
}

impl UsageAggregator {
    pub fn new(settings: CatalogSettings) -> Self {
        Self { settings }
    }

    pub fn current_usage(&self, conn: &Connection, username: &str) -> Result<Option<u64>> {
        self.create_storage_root_mapping(conn)?;
        create_user_colls(conn)?;
        self.populate_user_colls(conn, self.single_user_scope(username))?;

        let query = self
            .base_usage_query()
            .filter(Fragment::new("u.user_name = ?", [text(username)]))
            .limit(1)
            .build()?;
        tracing::trace!(sql = %query.sql, username, "single user usage query");

        let usage = conn
            .query_row(&query.sql, query.bind(), |row| row.get::<_, Option<i64>>(1))
            .optional()?
            .flatten();
        Ok(usage.map(|value| value.max(0) as u64))
    }

    pub fn current_usage_batch(
        &self,
        conn: &Connection,
        start: &str,
        end: &str,
    ) -> Result<AggregatedUsage> {
        self.create_storage_root_mapping(conn)?;
        create_user_colls(conn)?;
        self.populate_user_colls(conn, self.batch_scope(start, end))?;

        let query = self
            .base_usage_query()
            .filter(Fragment::new(
                "u.user_name BETWEEN ? AND ?",
                [text(start), text(end)],
            ))
            .having(Fragment::raw("SUM(d.data_size) > 0"))
            .build()?;
        tracing::trace!(sql = %query.sql, start, end, "batch usage query");

        let mut stmt = conn.prepare(&query.sql)?;
        let mut rows = stmt.query(query.bind())?;
        let mut usages = AggregatedUsage::new();
        while let Some(row) = rows.next()? {
            let username: String = row.get(0)?;
            let total: i64 = row.get(1)?;
            tracing::trace!(username = %username, total, "aggregated usage");
            usages.insert(username, total.max(0) as u64);
        }
        Ok(usages)
    }

    fn create_storage_root_mapping(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS temp.storage_root_mapping;
            CREATE TEMP TABLE storage_root_mapping (
              storage_id INTEGER NOT NULL,
              root_name TEXT NOT NULL
            );
            CREATE INDEX temp.idx_storage_root_mapping_root ON storage_root_mapping (root_name);
            "#,
        )?;
        let query = Insert::new("temp.storage_root_mapping", &["storage_id", "root_name"])
            .recursive()
            .with(Cte::new(
                "child_mapping",
                &["id", "storage", "root"],
                Fragment::new(
                    "SELECT resc_id, resc_net != ?, resc_name FROM r_resc_main \
                     WHERE resc_parent = '' AND resc_name != ? \
                     UNION SELECT r.resc_id, r.resc_net != ?, m.root \
                     FROM r_resc_main AS r JOIN child_mapping AS m \
                     ON CAST(m.id AS TEXT) = r.resc_parent",
                    [
                        text(EMPTY_RESOURCE_HOST),
                        text(BUNDLE_RESOURCE),
                        text(EMPTY_RESOURCE_HOST),
                    ],
                ),
            ))
            .select(
                Select::new()
                    .columns(&["id", "root"])
                    .from("child_mapping")
                    .filter(Fragment::raw("storage")),
            )
            .build()?;
        tracing::trace!(sql = %query.sql, "storage root mapping");
        conn.execute(&query.sql, query.bind())?;
        Ok(())
    }

    /// Collection prefixes a user's content can live under, most specific first.
    ///
    /// Trash service-account subtrees precede the plain trash prefix so their
    /// contents are attributed to the original owner, not the service account.
    fn owner_prefixes(&self) -> Vec<String> {
        let zone = &self.settings.zone;
        let mut prefixes = vec![format!("/{}/home/", zone)];
        for account in &self.settings.trash_service_accounts {
            prefixes.push(format!("/{}/trash/home/{}/", zone, account));
        }
        prefixes.push(format!("/{}/trash/home/", zone));
        prefixes
    }

    fn owner_expression(&self) -> Result<Fragment> {
        let mut arms = Fragment::raw("CASE");
        for prefix in self.owner_prefixes() {
            let width = prefix.chars().count() as u64;
            arms.push(Fragment::new(
                " WHEN substr(coll_name, 1, ?) = ? \
                 THEN substr(coll_name, ?, instr(substr(coll_name, ?) || '/', '/') - 1)",
                [
                    integer(width)?,
                    text(prefix),
                    integer(width + 1)?,
                    integer(width + 1)?,
                ],
            ));
        }
        arms.push_sql(" END");
        Ok(arms)
    }

    fn single_user_scope(&self, username: &str) -> Fragment {
        any_of(
            self.owner_prefixes()
                .into_iter()
                .map(|prefix| {
                    let root = format!("{}{}", prefix, username);
                    Fragment::join(
                        [
                            Fragment::new("coll_name = ?", [text(root.as_str())]),
                            subtree(&root),
                        ],
                        " OR ",
                    )
                })
                .collect(),
        )
    }

    fn batch_scope(&self, start: &str, end: &str) -> Fragment {
        any_of(
            self.owner_prefixes()
                .into_iter()
                .map(|prefix| {
                    let last = format!("{}{}", prefix, end);
                    Fragment::join(
                        [
                            Fragment::new(
                                "coll_name BETWEEN ? AND ?",
                                [text(format!("{}{}", prefix, start)), text(last.as_str())],
                            ),
                            subtree(&last),
                        ],
                        " OR ",
                    )
                })
                .collect(),
        )
    }

    fn populate_user_colls(&self, conn: &Connection, scope: Fragment) -> Result<()> {
        let query = Insert::new("temp.user_colls", &["user_name", "coll_id"])
            .select(
                Select::new()
                    .column_expr(self.owner_expression()?)
                    .column("coll_id")
                    .from("r_coll_main")
                    .filter(scope),
            )
            .build()?;
        tracing::trace!(sql = %query.sql, "populate user collections");
        conn.execute(&query.sql, query.bind())?;
        Ok(())
    }

    fn base_usage_query(&self) -> Select {
        let roots: Vec<Value> = self
            .settings
            .root_resources
            .iter()
            .map(|name| text(name.as_str()))
            .collect();
        Select::new()
            .columns(&["u.user_name", "SUM(d.data_size)"])
            .from("r_user_main AS u")
            .join("temp.user_colls AS c ON c.user_name = u.user_name")
            .join("r_data_main AS d ON d.coll_id = c.coll_id")
            .filter(Fragment::new(
                "u.user_type_name = ?",
                [text(self.settings.user_type.as_str())],
            ))
            .filter(Fragment::new(
                "u.zone_name = ?",
                [text(self.settings.zone.as_str())],
            ))
            .filter(
                in_list("root_name", roots).wrap(
                    "d.resc_id IN (SELECT storage_id FROM temp.storage_root_mapping WHERE ",
                    ")",
                ),
            )
            .group_by("u.user_name")
    }
}

fn create_user_colls(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS temp.user_colls;
        CREATE TEMP TABLE user_colls (user_name TEXT, coll_id INTEGER NOT NULL);
        CREATE INDEX temp.idx_user_colls_user ON user_colls (user_name);
        "#,
    )?;
    Ok(())
}

fn subtree(root: &str) -> Fragment {
    Fragment::new(
        "(coll_name >= ? AND coll_name < ?)",
        [text(format!("{}/", root)), text(format!("{}0", root))],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_account_prefixes_precede_plain_trash() {
        let aggregator = UsageAggregator::new(CatalogSettings::default());
        assert_eq!(
            aggregator.owner_prefixes(),
            vec![
                "/iplant/home/".to_string(),
                "/iplant/trash/home/de-irods/".to_string(),
                "/iplant/trash/home/ipcservices/".to_string(),
                "/iplant/trash/home/".to_string(),
            ]
        );
    }

    #[test]
    fn scopes_bind_every_placeholder() {
        let aggregator = UsageAggregator::new(CatalogSettings::default());
        assert!(aggregator.single_user_scope("alice").build().is_ok());
        assert!(aggregator.batch_scope("alice", "bob").build().is_ok());
        assert!(aggregator.owner_expression().expect("owner").build().is_ok());
    }
}
