//! Backend configuration.
//!
//! Credentials come from the environment first, then from a YAML file under
//! the user config dir. Missing or placeholder values are a startup error;
//! nothing else runs until the configuration is fixed.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Environment variable naming the backend project URL.
pub const ENV_URL: &str = "TASKDESK_URL";
/// Environment variable naming the backend anon/publishable API key.
pub const ENV_API_KEY: &str = "TASKDESK_API_KEY";

/// Placeholder values shipped in setup templates; treated as unconfigured.
const PLACEHOLDER_URLS: &[&str] = &["https://your-project.example.com", "YOUR_BACKEND_URL"];

fn default_attachments_bucket() -> String {
    "attachments".to_string()
}

fn default_sync_interval_secs() -> u64 {
    15
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abc123.backend.example.com`.
    pub base_url: String,

    /// Anon/publishable API key sent with every request.
    pub api_key: String,

    /// Object-storage bucket that receives task attachments.
    #[serde(default = "default_attachments_bucket")]
    pub attachments_bucket: String,

    /// Interval for the change-feed diff sync, in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl BackendConfig {
    /// Resolve configuration: environment variables win over the config file.
    pub fn load() -> Result<Self> {
        let from_file = Self::read_file();

        let base_url = std::env::var(ENV_URL)
            .ok()
            .or_else(|| from_file.as_ref().map(|c| c.base_url.clone()))
            .unwrap_or_default();
        let api_key = std::env::var(ENV_API_KEY)
            .ok()
            .or_else(|| from_file.as_ref().map(|c| c.api_key.clone()))
            .unwrap_or_default();

        let config = Self {
            base_url,
            api_key,
            attachments_bucket: from_file
                .as_ref()
                .map(|c| c.attachments_bucket.clone())
                .unwrap_or_else(default_attachments_bucket),
            sync_interval_secs: from_file
                .as_ref()
                .map(|c| c.sync_interval_secs)
                .unwrap_or_else(default_sync_interval_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Default config file location: `<config dir>/taskdesk/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("taskdesk").join("config.yaml"))
    }

    fn read_file() -> Option<Self> {
        let path = Self::default_path()?;
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_yaml::from_str(&text) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unparseable config file");
                None
            }
        }
    }

    /// Reject missing and placeholder credentials.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() || self.api_key.trim().is_empty() {
            return Err(Error::NotConfigured(format!(
                "set {ENV_URL} and {ENV_API_KEY}, or fill in the config file"
            )));
        }
        if PLACEHOLDER_URLS.contains(&self.base_url.as_str()) {
            return Err(Error::NotConfigured(
                "the backend URL is still the setup placeholder".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::NotConfigured(format!(
                "backend URL must be http(s), got {:?}",
                self.base_url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str, key: &str) -> BackendConfig {
        BackendConfig {
            base_url: url.to_string(),
            api_key: key.to_string(),
            attachments_bucket: default_attachments_bucket(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }

    #[test]
    fn validate_accepts_real_credentials() {
        assert!(config("https://abc.backend.example.com", "anon-key")
            .validate()
            .is_ok());
    }

    #[test]
    fn validate_rejects_empty_values() {
        assert!(config("", "key").validate().is_err());
        assert!(config("https://x.example.com", "").validate().is_err());
    }

    #[test]
    fn validate_rejects_placeholders() {
        assert!(config("https://your-project.example.com", "key")
            .validate()
            .is_err());
        assert!(config("YOUR_BACKEND_URL", "key").validate().is_err());
    }

    #[test]
    fn validate_rejects_non_http_urls() {
        assert!(config("ftp://x.example.com", "key").validate().is_err());
    }

    #[test]
    fn yaml_defaults_fill_optional_fields() {
        let config: BackendConfig =
            serde_yaml::from_str("base_url: https://x.example.com\napi_key: k\n").unwrap();
        assert_eq!(config.attachments_bucket, "attachments");
        assert_eq!(config.sync_interval_secs, 15);
    }
}
