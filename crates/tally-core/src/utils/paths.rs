use std::path::PathBuf;

const APP_NAME: &str = "tally";

/// Standardized application directories for Tally.
///
/// - User-level config: `<config dir>/tally`
/// - User-level data (logs): `<data dir>/tally`
pub struct AppPaths;

impl AppPaths {
    pub fn user_config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", APP_NAME).map(|d| d.config_dir().to_path_buf())
    }

    pub fn user_data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", APP_NAME).map(|d| d.data_dir().to_path_buf())
    }

    /// `<config dir>/tally/config.toml`
    pub fn user_config_file() -> Option<PathBuf> {
        Self::user_config_dir().map(|d| d.join("config.toml"))
    }

    pub fn log_dir() -> Option<PathBuf> {
        Self::user_data_dir().map(|d| d.join("logs"))
    }
}
