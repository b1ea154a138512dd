use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "FEMTOCRON_DATA_DIR";

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Directory holding `cron.json`.
    pub data_dir: PathBuf,
    /// Bound of the agent inbox fed by fired jobs.
    pub inbox_capacity: usize,
    /// Buffered change events per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Remove disabled jobs when `run` exits.
    pub cleanup_on_exit: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    inbox_capacity: Option<usize>,
    event_capacity: Option<usize>,
    cleanup_on_exit: Option<bool>,
}

pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".femtocron")
}

pub fn config_path() -> PathBuf {
    base_dir().join("config.json")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: base_dir().join("data"),
            inbox_capacity: 100,
            event_capacity: 64,
            cleanup_on_exit: true,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_from(&config_path())?;
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
            cfg.data_dir = PathBuf::from(dir);
        }
        Ok(cfg)
    }

    /// Defaults for anything the file (if present) does not set.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::default();
        if !path.exists() {
            return Ok(cfg);
        }

        let content = fs::read_to_string(path)?;
        let file: FileConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow!("failed to parse config at {}: {e}", path.display()))?;

        if let Some(dir) = file.data_dir {
            cfg.data_dir = dir;
        }
        if let Some(n) = file.inbox_capacity {
            cfg.inbox_capacity = n;
        }
        if let Some(n) = file.event_capacity {
            cfg.event_capacity = n;
        }
        if let Some(b) = file.cleanup_on_exit {
            cfg.cleanup_on_exit = b;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg.inbox_capacity, 100);
        assert_eq!(cfg.event_capacity, 64);
        assert!(cfg.cleanup_on_exit);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"dataDir": "/var/lib/femtocron", "cleanupOnExit": false}"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/femtocron"));
        assert!(!cfg.cleanup_on_exit);
        assert_eq!(cfg.inbox_capacity, 100);
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err().to_string();
        assert!(err.contains("config.json"), "{err}");
    }
}
