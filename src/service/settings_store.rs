//! Runtime overrides persisted as a flat JSON object.

use crate::error::ConfigWriteError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files yield no overrides.
    pub async fn load(&self) -> Map<String, Value> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                warn!("could not read settings file {}: {}", self.path.display(), e);
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!("settings file {} is not a JSON object, ignoring", self.path.display());
                Map::new()
            }
            Err(e) => {
                warn!("could not parse settings file {}: {}", self.path.display(), e);
                Map::new()
            }
        }
    }

    /// Read-modify-write of one key; the file is created when absent.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), ConfigWriteError> {
        let path = self.path.display().to_string();

        let mut settings = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) if data.trim().is_empty() => Map::new(),
            Ok(data) => serde_json::from_str::<Map<String, Value>>(&data).map_err(|source| {
                ConfigWriteError::Json {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(ConfigWriteError::Io { path, source }),
        };

        settings.insert(key.to_string(), value);
        let body = serde_json::to_string_pretty(&settings).map_err(|source| ConfigWriteError::Json {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|source| ConfigWriteError::Io { path, source })?;

        info!("saved {} to {}", key, self.path.display());
        Ok(())
    }
}
