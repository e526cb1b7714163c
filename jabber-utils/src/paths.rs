//! Path utilities for the jabber bridge
//!
//! Handles XDG Base Directory locations for config, data, and logs.

use std::path::PathBuf;

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "jabber-bridge";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/jabber-bridge` or `~/.config/jabber-bridge`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback(".config"))
}

/// Get the main configuration file path
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the data directory (persistent state such as the address book)
///
/// Location: `$XDG_DATA_HOME/jabber-bridge` or `~/.local/share/jabber-bridge`
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback(".local/share"))
}

/// Get the address book file path
pub fn address_book_file() -> PathBuf {
    data_dir().join("address_book.json")
}

/// Get the log directory
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

fn home_fallback(subdir: &str) -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(subdir)
        .join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_under_config_dir() {
        assert!(config_file().starts_with(config_dir()));
        assert!(config_file().ends_with("config.toml"));
    }

    #[test]
    fn test_address_book_under_data_dir() {
        assert!(address_book_file().starts_with(data_dir()));
        assert!(address_book_file().ends_with("address_book.json"));
    }

    #[test]
    fn test_log_dir_under_data_dir() {
        assert!(log_dir().starts_with(data_dir()));
    }
}
