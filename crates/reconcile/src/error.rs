use std::fmt;
use std::time::Duration;

use thiserror::Error;
use usage_core::TriggerParseError;
use usage_db::DbError;

/// Which of the two stores an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Catalog,
    Record,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog => write!(f, "catalog"),
            Self::Record => write!(f, "system-of-record"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no usage recorded for {0}")]
    NotFound(String),
    #[error("user {0} does not exist in the system-of-record")]
    UserNotFound(String),
    #[error("aggregation failed: {0}")]
    AggregationFailed(#[source] DbError),
    #[error("write failed: {0}")]
    WriteFailed(#[source] DbError),
    #[error("read failed: {0}")]
    ReadFailed(#[source] DbError),
    #[error("could not open {store} transaction: {source}")]
    TransactionSetupFailed {
        store: Store,
        #[source]
        source: DbError,
    },
    #[error("{operation} exceeded its {timeout:?} deadline")]
    TimedOut {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("{store} pool: {source}")]
    Pool {
        store: Store,
        #[source]
        source: DbError,
    },
    #[error("invalid trigger: {0}")]
    InvalidTrigger(#[from] TriggerParseError),
    #[error("blocking task failed: {0}")]
    Task(String),
}

impl ReconcileError {
    /// True for the "nothing recorded yet" outcome callers usually treat as soft.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::UserNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
