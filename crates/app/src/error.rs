use reconcile::ReconcileError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("toml render error: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("db error: {0}")]
    Db(#[from] usage_db::DbError),
    #[error("{0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let (status, code) = match &err {
            AppError::Reconcile(inner) if inner.is_not_found() => {
                (404, Some("not_found".to_string()))
            }
            AppError::InvalidInput(_)
            | AppError::Config(_)
            | AppError::Reconcile(ReconcileError::InvalidTrigger(_)) => {
                (400, Some("invalid_input".to_string()))
            }
            AppError::Reconcile(ReconcileError::TimedOut { .. }) => {
                (500, Some("timed_out".to_string()))
            }
            AppError::Reconcile(_)
            | AppError::Io(_)
            | AppError::Toml(_)
            | AppError::TomlRender(_)
            | AppError::Db(_) => (500, None),
        };
        Self {
            status,
            message: err.to_string(),
            code,
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        AppError::from(err).into()
    }
}
