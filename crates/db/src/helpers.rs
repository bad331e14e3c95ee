use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use usage_core::UsageRecord;

/// Column list matching [`row_to_usage_record`].
pub(crate) const USAGE_RECORD_COLUMNS: &[&str] = &[
    "d.id",
    "d.total",
    "d.user_id",
    "u.username",
    "d.time",
    "d.last_modified",
];

/// Fixed-width RFC 3339 so lexical order equals chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

pub(crate) fn row_to_usage_record(
    row: &Row<'_>,
) -> std::result::Result<UsageRecord, rusqlite::Error> {
    let measured_at: String = row.get(4)?;
    let last_modified: String = row.get(5)?;
    Ok(UsageRecord {
        id: row.get(0)?,
        total: row.get::<_, i64>(1)?.max(0) as u64,
        user_id: row.get(2)?,
        username: row.get(3)?,
        measured_at: parse_column_timestamp(4, &measured_at)?,
        last_modified: parse_column_timestamp(5, &last_modified)?,
    })
}

fn parse_column_timestamp(
    idx: usize,
    value: &str,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    parse_timestamp(value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}
