//! Path utilities

use std::path::PathBuf;

/// Data directory (~/.sandagent), falling back to ./.sandagent without a home
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sandagent")
}

/// Configuration file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}
