pub mod languages;
pub mod run;
pub mod serve;

use anyhow::Result;
use sandpit_engine::EngineConfig;
use std::path::PathBuf;
use tracing::info;

/// An explicit `--config` must load; otherwise `config/sandpit.toml` is
/// optional and defaults apply.
pub(crate) fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    if let Some(path) = path {
        let config = EngineConfig::from_file(&path)?;
        info!("Loaded configuration from {}", path.display());
        return Ok(config);
    }

    match EngineConfig::from_project_root() {
        Ok(config) => {
            info!("Loaded configuration from config/sandpit.toml");
            Ok(config)
        }
        Err(e) => {
            info!("Using default configuration ({})", e);
            Ok(EngineConfig::default())
        }
    }
}
