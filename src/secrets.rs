// Polychat API key storage
//
// Keys live in `<config dir>/config.json`, one per mode. The file is
// rewritten whole on every update and is not locked.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::config::Mode;

const CONFIG_FILE_NAME: &str = "config.json";

/// On-disk layout of config.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polychat_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_polychat_api_key: Option<String>,

    /// Keys we do not know about survive a rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KeyFile {
    pub fn key(&self, mode: Mode) -> Option<&str> {
        let key = match mode {
            Mode::Production => self.polychat_api_key.as_deref(),
            Mode::Local => self.local_polychat_api_key.as_deref(),
        };
        key.filter(|k| !k.is_empty())
    }

    pub fn set_key(&mut self, mode: Mode, key: String) {
        match mode {
            Mode::Production => self.polychat_api_key = Some(key),
            Mode::Local => self.local_polychat_api_key = Some(key),
        }
    }
}

/// File-backed store for the per-mode API keys
#[derive(Debug, Clone)]
pub struct ApiKeyStore {
    dir: PathBuf,
    file: PathBuf,
}

impl ApiKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let file = dir.join(CONFIG_FILE_NAME);
        Self { dir, file }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Load the key file. Missing or unreadable files read as empty.
    pub fn load(&self) -> KeyFile {
        let content = match std::fs::read_to_string(&self.file) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read {}: {}", self.file.display(), e);
                }
                return KeyFile::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed {}: {}", self.file.display(), e);
            KeyFile::default()
        })
    }

    /// Write the whole key file, creating its directory if needed
    pub fn save(&self, keys: &KeyFile) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let content = serde_json::to_string_pretty(keys).context("Failed to serialize API keys")?;
        std::fs::write(&self.file, content)
            .with_context(|| format!("Failed to write {}", self.file.display()))?;

        tracing::debug!("Saved API keys to {}", self.file.display());
        Ok(())
    }

    pub fn get(&self, mode: Mode) -> Option<String> {
        self.load().key(mode).map(str::to_string)
    }

    pub fn set(&self, mode: Mode, key: &str) -> Result<()> {
        let mut keys = self.load();
        keys.set_key(mode, key.to_string());
        self.save(&keys)
    }
}
