use rusqlite::types::Value;

use crate::error::{DbError, Result};

/// A piece of SQL together with the values bound to its `?` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    sql: String,
    params: Vec<Value>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, params: impl IntoIterator<Item = Value>) -> Self {
        Self {
            sql: sql.into(),
            params: params.into_iter().collect(),
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, [])
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn push(&mut self, other: Fragment) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }

    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub fn join(parts: impl IntoIterator<Item = Fragment>, separator: &str) -> Fragment {
        let mut out = Fragment::default();
        for (idx, part) in parts.into_iter().enumerate() {
            if idx > 0 {
                out.push_sql(separator);
            }
            out.push(part);
        }
        out
    }

    pub fn wrap(self, prefix: &str, suffix: &str) -> Fragment {
        let mut out = Fragment::raw(prefix);
        out.push(self);
        out.push_sql(suffix);
        out
    }

    pub fn build(self) -> Result<BuiltQuery> {
        let placeholders = self.sql.matches('?').count();
        if placeholders != self.params.len() {
            return Err(DbError::Query(format!(
                "{} placeholders but {} bound values",
                placeholders,
                self.params.len()
            )));
        }
        Ok(BuiltQuery {
            sql: self.sql,
            params: self.params,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BuiltQuery {
    pub fn bind(&self) -> rusqlite::ParamsFromIter<std::slice::Iter<'_, Value>> {
        rusqlite::params_from_iter(self.params.iter())
    }
}

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn integer(value: u64) -> Result<Value> {
    i64::try_from(value)
        .map(Value::Integer)
        .map_err(|_| DbError::Query(format!("value {} exceeds the integer range", value)))
}

/// `column IN (?, ?, ...)`; an empty list matches nothing.
pub fn in_list(column: &'static str, values: impl IntoIterator<Item = Value>) -> Fragment {
    let values: Vec<Value> = values.into_iter().collect();
    if values.is_empty() {
        return Fragment::raw("0");
    }
    let marks = vec!["?"; values.len()].join(", ");
    Fragment::new(format!("{} IN ({})", column, marks), values)
}

pub fn values_table(width: usize, rows: Vec<Vec<Value>>) -> Result<Fragment> {
    if width == 0 {
        return Err(DbError::Query("values table needs at least one column".to_string()));
    }
    if rows.is_empty() {
        let nulls = vec!["NULL"; width].join(", ");
        return Ok(Fragment::raw(format!("SELECT {} WHERE 0", nulls)));
    }
    let row_marks = format!("({})", vec!["?"; width].join(", "));
    let mut params = Vec::with_capacity(rows.len() * width);
    let mut marks = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != width {
            return Err(DbError::Query(format!(
                "values row has {} columns, expected {}",
                row.len(),
                width
            )));
        }
        params.extend(row);
        marks.push(row_marks.as_str());
    }
    Ok(Fragment::new(format!("VALUES {}", marks.join(", ")), params))
}

#[derive(Debug, Clone)]
pub struct Cte {
    name: &'static str,
    columns: &'static [&'static str],
    body: Fragment,
}

impl Cte {
    pub fn new(name: &'static str, columns: &'static [&'static str], body: Fragment) -> Self {
        Self {
            name,
            columns,
            body,
        }
    }

    fn render(self) -> Fragment {
        let head = if self.columns.is_empty() {
            format!("{} AS (", self.name)
        } else {
            format!("{}({}) AS (", self.name, self.columns.join(", "))
        };
        self.body.wrap(&head, ")")
    }
}

fn render_with(ctes: Vec<Cte>, recursive: bool) -> Fragment {
    if ctes.is_empty() {
        return Fragment::default();
    }
    let keyword = if recursive { "WITH RECURSIVE " } else { "WITH " };
    Fragment::join(ctes.into_iter().map(Cte::render), ", ").wrap(keyword, " ")
}

#[derive(Debug, Clone, Default)]
pub struct Select {
    ctes: Vec<Cte>,
    recursive: bool,
    distinct: bool,
    columns: Vec<Fragment>,
    from: Option<Fragment>,
    joins: Vec<Fragment>,
    wheres: Vec<Fragment>,
    group_by: Vec<&'static str>,
    having: Vec<Fragment>,
    order_by: Vec<&'static str>,
    limit: Option<u64>,
    union_all: Vec<Select>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, cte: Cte) -> Self {
        self.ctes.push(cte);
        self
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn column(mut self, column: &'static str) -> Self {
        self.columns.push(Fragment::raw(column));
        self
    }

    pub fn columns(mut self, columns: &[&'static str]) -> Self {
        self.columns
            .extend(columns.iter().map(|column| Fragment::raw(*column)));
        self
    }

    pub fn column_expr(mut self, expr: Fragment) -> Self {
        self.columns.push(expr);
        self
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn from(mut self, table: &'static str) -> Self {
        self.from = Some(Fragment::raw(table));
        self
    }

    pub fn join(mut self, clause: &'static str) -> Self {
        self.joins.push(Fragment::raw(format!("JOIN {}", clause)));
        self
    }

    pub fn left_join(mut self, clause: &'static str) -> Self {
        self.joins.push(Fragment::raw(format!("LEFT JOIN {}", clause)));
        self
    }

    pub fn filter(mut self, condition: Fragment) -> Self {
        self.wheres.push(condition);
        self
    }

    pub fn group_by(mut self, column: &'static str) -> Self {
        self.group_by.push(column);
        self
    }

    pub fn having(mut self, condition: Fragment) -> Self {
        self.having.push(condition);
        self
    }

    pub fn order_by(mut self, clause: &'static str) -> Self {
        self.order_by.push(clause);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn union_all(mut self, other: Select) -> Self {
        self.union_all.push(other);
        self
    }

    pub fn into_fragment(self) -> Result<Fragment> {
        if self.columns.is_empty() {
            return Err(DbError::Query("select without columns".to_string()));
        }
        let mut out = render_with(self.ctes, self.recursive);
        out.push_sql(if self.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });
        let width = self.columns.len();
        out.push(Fragment::join(self.columns, ", "));
        if let Some(from) = self.from {
            out.push(from.wrap(" FROM ", ""));
        }
        for join in self.joins {
            out.push(join.wrap(" ", ""));
        }
        if !self.wheres.is_empty() {
            out.push(conjunction(self.wheres).wrap(" WHERE ", ""));
        }
        if !self.group_by.is_empty() {
            out.push_sql(&format!(" GROUP BY {}", self.group_by.join(", ")));
        }
        if !self.having.is_empty() {
            out.push(conjunction(self.having).wrap(" HAVING ", ""));
        }
        for other in self.union_all {
            if other.columns.len() != width {
                return Err(DbError::Query(format!(
                    "UNION ALL arm has {} columns, expected {}",
                    other.columns.len(),
                    width
                )));
            }
            out.push(other.into_fragment()?.wrap(" UNION ALL ", ""));
        }
        if !self.order_by.is_empty() {
            out.push_sql(&format!(" ORDER BY {}", self.order_by.join(", ")));
        }
        if let Some(limit) = self.limit {
            out.push_sql(&format!(" LIMIT {}", limit));
        }
        Ok(out)
    }

    pub fn build(self) -> Result<BuiltQuery> {
        self.into_fragment()?.build()
    }
}

fn conjunction(conditions: Vec<Fragment>) -> Fragment {
    if conditions.len() == 1 {
        return conditions.into_iter().next().unwrap_or_default();
    }
    Fragment::join(
        conditions.into_iter().map(|condition| condition.wrap("(", ")")),
        " AND ",
    )
}

pub fn any_of(conditions: Vec<Fragment>) -> Fragment {
    if conditions.is_empty() {
        return Fragment::raw("0");
    }
    Fragment::join(
        conditions.into_iter().map(|condition| condition.wrap("(", ")")),
        " OR ",
    )
}

#[derive(Debug, Clone)]
enum InsertSource {
    Values(Vec<Vec<Value>>),
    Select(Box<Select>),
}

#[derive(Debug, Clone)]
pub struct Insert {
    ctes: Vec<Cte>,
    recursive: bool,
    table: &'static str,
    columns: Vec<&'static str>,
    source: InsertSource,
    on_conflict: Option<&'static str>,
    returning: Vec<&'static str>,
}

impl Insert {
    pub fn new(table: &'static str, columns: &[&'static str]) -> Self {
        Self {
            ctes: Vec::new(),
            recursive: false,
            table,
            columns: columns.to_vec(),
            source: InsertSource::Values(Vec::new()),
            on_conflict: None,
            returning: Vec::new(),
        }
    }

    pub fn with(mut self, cte: Cte) -> Self {
        self.ctes.push(cte);
        self
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn values(mut self, row: Vec<Value>) -> Self {
        match &mut self.source {
            InsertSource::Values(rows) => rows.push(row),
            InsertSource::Select(_) => self.source = InsertSource::Values(vec![row]),
        }
        self
    }

    pub fn select(mut self, select: Select) -> Self {
        self.source = InsertSource::Select(Box::new(select));
        self
    }

    pub fn on_conflict(mut self, clause: &'static str) -> Self {
        self.on_conflict = Some(clause);
        self
    }

    pub fn returning(mut self, columns: &[&'static str]) -> Self {
        self.returning.extend_from_slice(columns);
        self
    }

    pub fn build(self) -> Result<BuiltQuery> {
        if self.columns.is_empty() {
            return Err(DbError::Query(format!("insert into {} without columns", self.table)));
        }
        let width = self.columns.len();
        let mut out = render_with(self.ctes, self.recursive);
        out.push_sql(&format!(
            "INSERT INTO {} ({}) ",
            self.table,
            self.columns.join(", ")
        ));
        match self.source {
            InsertSource::Values(rows) => {
                if rows.is_empty() {
                    return Err(DbError::Query(format!("insert into {} without rows", self.table)));
                }
                out.push(values_table(width, rows)?);
            }
            InsertSource::Select(select) => {
                if select.column_count() != width {
                    return Err(DbError::Query(format!(
                        "insert into {} selects {} columns, expected {}",
                        self.table,
                        select.column_count(),
                        width
                    )));
                }
                out.push(select.into_fragment()?);
            }
        }
        if let Some(clause) = self.on_conflict {
            out.push_sql(&format!(" {}", clause));
        }
        if !self.returning.is_empty() {
            out.push_sql(&format!(" RETURNING {}", self.returning.join(", ")));
        }
        out.build()
    }
}
