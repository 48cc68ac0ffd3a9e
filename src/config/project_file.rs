//! Locating and reading `jaunt.toml`.

use super::JauntConfig;
use crate::error::JauntError;
use config::{Config, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "jaunt.toml";

/// Walk upward from `start` to the first directory containing `jaunt.toml`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let start = dunce::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE_NAME).is_file())
        .map(Path::to_path_buf)
}

/// Load and validate the config for `root`.
///
/// `config_path` overrides the default `<root>/jaunt.toml`.
pub fn load_config(root: &Path, config_path: Option<&Path>) -> Result<JauntConfig, JauntError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
    if !path.is_file() {
        return Err(JauntError::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let path_str = path.to_str().ok_or_else(|| {
        JauntError::Config(format!("Config path is not valid UTF-8: {}", path.display()))
    })?;

    debug!(path = %path.display(), "Loading config");
    let settings = Config::builder()
        .add_source(File::new(path_str, FileFormat::Toml).required(true))
        .build()?;
    let cfg: JauntConfig = settings.try_deserialize()?;

    cfg.validate(root)?;
    Ok(cfg)
}
