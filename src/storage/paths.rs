//! Application paths for config and data.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application paths.
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Data directory (database lives here).
    pub data: PathBuf,
}

impl AppPaths {
    /// Create paths for the quotad application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("dev", "quotad", "quotad") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            let home = directories::BaseDirs::new()
                .map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
            Self {
                config: home.join(".config/quotad"),
                data: home.join(".local/share/quotad"),
            }
        }
    }

    /// Path to the TOML config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Default database location.
    #[must_use]
    pub fn db_file(&self) -> PathBuf {
        self.data.join("quotad.db")
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
