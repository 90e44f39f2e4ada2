//! Account configuration at ~/.config/talksync/config.toml
//!
//! The engine only needs to know which server the rooms live on and which
//! user it is acting as; credentials stay with the host's `RoomApi`
//! implementation.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Server base URL, stored without a trailing slash.
    pub base_url: String,
    /// Login of the acting user, used for delegate comparisons.
    pub user_id: String,
}

impl AccountConfig {
    pub fn new(base_url: &str, user_id: &str) -> Self {
        AccountConfig {
            base_url: normalize_base_url(base_url),
            user_id: user_id.trim().to_string(),
        }
    }

    pub fn config_path() -> SyncResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SyncError::Config("Could not determine config directory".into()))?
            .join("talksync");
        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> SyncResult<Self> {
        let path = Self::config_path()?;
        let content = std::fs::read_to_string(&path)?;
        let parsed: AccountConfig =
            toml::from_str(&content).map_err(|e| SyncError::Config(e.to_string()))?;
        Ok(AccountConfig::new(&parsed.base_url, &parsed.user_id))
    }

    /// Case-folded user id for delegate comparisons.
    pub fn user_id_normalized(&self) -> String {
        self.user_id.trim().to_ascii_lowercase()
    }
}

/// Trim whitespace and the trailing slash from a server base URL.
pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
