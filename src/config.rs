use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const CONFIG_FILENAME: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(rename = "storageLocation")]
    pub storage_location: PathBuf,
    #[serde(rename = "masterFolderPath")]
    pub master_folder_path: Option<PathBuf>,
    #[serde(rename = "isFirstLaunch")]
    pub is_first_launch: bool,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "minimizeToTray")]
    pub minimize_to_tray: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_location: app_data_dir().join("artifacts"),
            master_folder_path: None,
            is_first_launch: true,
            user_id: None,
            minimize_to_tray: true,
        }
    }
}

/// Per-user application-data directory, resolved via `dirs`.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lumosnap")
}

fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILENAME)
}

/// Missing file or malformed JSON both yield `Config::default()` — logged, never a panic.
pub fn read_config(home: &Path) -> Config {
    let path = config_path(home);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => return Config::default(),
    };
    match serde_json::from_str(&contents) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(?err, path = %path.display(), "config file malformed, using defaults");
            Config::default()
        }
    }
}

/// Atomic write via temp-file + rename, the same discipline as `projects::manager::write_config`.
pub fn write_config(home: &Path, config: &Config) -> Result<()> {
    fs::create_dir_all(home)?;
    let path = config_path(home);
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(config)?;
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_config_missing_file_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        let config = read_config(tmp.path());
        assert!(config.is_first_launch);
    }

    #[test]
    fn test_write_then_read_config_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.is_first_launch = false;
        config.user_id = Some("u1".into());
        write_config(tmp.path(), &config).unwrap();
        let read_back = read_config(tmp.path());
        assert_eq!(read_back, config);
    }

    #[test]
    fn test_read_config_malformed_file_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path()).unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), b"{not json").unwrap();
        let config = read_config(tmp.path());
        assert!(config.is_first_launch);
    }

    #[test]
    fn test_config_json_field_names() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"storageLocation\""));
        assert!(json.contains("\"isFirstLaunch\""));
    }
}
