#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("time parse error: {0}")]
    TimeParse(#[from] chrono::ParseError),
    #[error("query construction error: {0}")]
    Query(String),
    #[error("invalid username: {0}")]
    InvalidUsername(String),
    #[error("connection pool {0} is closed")]
    PoolClosed(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
