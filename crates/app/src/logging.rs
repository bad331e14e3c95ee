use tracing_subscriber::EnvFilter;

use crate::error::{AppError, Result};

/// Installs the process-wide subscriber. `RUST_LOG` overrides `level`.
pub fn init(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|err| AppError::Config(format!("log level {}: {}", level, err)))?,
    };
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
