use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub status_db_path: PathBuf,
    pub logs_root: PathBuf,
    pub devices_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let status_db_path = crate::paths::data_dir()
            .map(|dir| dir.join("test_execution_db.json"))
            .unwrap_or_else(|_| PathBuf::from("test_execution_db.json"));
        let logs_root =
            crate::paths::logs_dir().unwrap_or_else(|_| PathBuf::from("logs"));
        let devices_dir =
            crate::paths::devices_dir().unwrap_or_else(|_| PathBuf::from("devices"));
        Self {
            host: "127.0.0.1".to_string(),
            port: 6820,
            status_db_path,
            logs_root,
            devices_dir,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = Self::from_conf_file()? {
            config.apply_file(file_config);
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().unwrap_or(6820);
        }

        if let Ok(db_path) = std::env::var("STATUS_DB_PATH") {
            config.status_db_path = PathBuf::from(db_path);
        }

        if let Ok(logs_root) = std::env::var("LOGS_ROOT") {
            config.logs_root = PathBuf::from(logs_root);
        }

        if let Ok(devices_dir) = std::env::var("DEVICES_DIR") {
            config.devices_dir = PathBuf::from(devices_dir);
        }

        Ok(config)
    }

    fn from_conf_file() -> Result<Option<FileConfig>> {
        let path = crate::paths::conf_dir()
            .map(|dir| dir.join("config.json"))
            .ok();
        let Some(path) = path else {
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig) {
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(status_db_path) = file_config.status_db_path {
            self.status_db_path = PathBuf::from(status_db_path);
        }
        if let Some(logs_root) = file_config.logs_root {
            self.logs_root = PathBuf::from(logs_root);
        }
        if let Some(devices_dir) = file_config.devices_dir {
            self.devices_dir = PathBuf::from(devices_dir);
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    status_db_path: Option<String>,
    logs_root: Option<String>,
    devices_dir: Option<String>,
}
