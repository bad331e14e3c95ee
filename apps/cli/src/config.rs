use std::fs;
use std::path::PathBuf;

use usage_app::{AppConfig, DEFAULT_CONFIG_PATH};

const CONFIG_ENV: &str = "DATA_USAGE_CONFIG";

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: AppConfig,
    pub file: PathBuf,
    pub created: bool,
}

/// Reads the config at `--config`, `$DATA_USAGE_CONFIG` or the default path,
/// writing a default file first when none exists.
pub fn load_or_create(explicit: Option<PathBuf>) -> Result<ConfigLoad, String> {
    let file = explicit
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if file.exists() {
        let config = AppConfig::load(&file)
            .map_err(|err| format!("load config {}: {}", file.display(), err))?;
        return Ok(ConfigLoad {
            config,
            file,
            created: false,
        });
    }

    if let Some(dir) = file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|err| format!("create config dir {}: {}", dir.display(), err))?;
    }
    let config = AppConfig::default();
    let contents = config
        .to_toml_string()
        .map_err(|err| format!("serialize config: {}", err))?;
    fs::write(&file, contents)
        .map_err(|err| format!("write config {}: {}", file.display(), err))?;

    Ok(ConfigLoad {
        config,
        file,
        created: true,
    })
}
