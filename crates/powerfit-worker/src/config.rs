//! Worker configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use powerfit_common::{RetryConfig, ShellError};
use powerfit_net::{resolve, NetError};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::routes::Route;

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Site origin the worker is registered for
    pub origin: Url,

    /// Current cache generation; bump it whenever the manifest changes
    pub cache_name: String,

    /// Shell assets cached at install
    pub shell_manifest: Vec<String>,

    /// Document served to navigations while offline
    pub offline_fallback: String,

    /// Per-route strategy overrides
    pub routes: Vec<Route>,

    /// Background sync settings
    pub sync: SyncConfig,

    /// Push notification presentation
    pub notifications: NotificationConfig,

    /// Install retry policy
    pub install_retry: InstallRetryConfig,

    /// Upper bound for a single event's extended lifetime, in seconds
    pub event_timeout_secs: u64,

    /// SQLite file holding the pending-submission queue
    pub storage_path: PathBuf,

    /// Optional byte budget for all caches
    pub cache_quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// One-shot sync tag that replays contact-form submissions
    pub contact_form_tag: String,

    /// Periodic sync tag that refreshes the shell
    pub periodic_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,

    /// Body used when a push arrives without payload
    pub default_body: String,

    pub icon: String,
    pub badge: String,
    pub action_icon: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,

    /// Path opened by the "explore" action
    pub open_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallRetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static URL is valid"),
            cache_name: "powerfit-gym-v1".to_string(),
            shell_manifest: [
                "/",
                "/index.html",
                "/styles.css",
                "/script.js",
                "/manifest.json",
                "/icons/icon-192x192.png",
                "/icons/icon-512x512.png",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            offline_fallback: "/index.html".to_string(),
            routes: Vec::new(),
            sync: SyncConfig::default(),
            notifications: NotificationConfig::default(),
            install_retry: InstallRetryConfig::default(),
            event_timeout_secs: 300,
            storage_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("powerfit")
                .join("shell.db"),
            cache_quota_bytes: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contact_form_tag: "contact-form".to_string(),
            periodic_tag: "update-content".to_string(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "PowerFit Gym".to_string(),
            default_body: "New update from PowerFit Gym!".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            action_icon: "/icons/icon-96x96.png".to_string(),
            vibrate: vec![100, 50, 100],
            open_path: "/".to_string(),
        }
    }
}

impl Default for InstallRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

impl From<&InstallRetryConfig> for RetryConfig {
    fn from(config: &InstallRetryConfig) -> Self {
        RetryConfig {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            ..RetryConfig::default()
        }
    }
}

impl WorkerConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> powerfit_common::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ShellError::config_with_source(format!("cannot read {}", path.display()), e)
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ShellError::config_with_source(format!("cannot parse {}", path.display()), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> powerfit_common::Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ShellError::config("cache_name must not be empty"));
        }
        if self.shell_manifest.is_empty() {
            return Err(ShellError::config("shell_manifest must list at least one asset"));
        }
        if !self.shell_manifest.contains(&self.offline_fallback) {
            return Err(ShellError::config(format!(
                "offline_fallback {} is not part of the shell manifest",
                self.offline_fallback
            )));
        }
        for entry in self.shell_manifest.iter().chain([&self.offline_fallback]) {
            let url = self
                .resolve(entry)
                .map_err(|e| ShellError::config_with_source("bad manifest entry", e))?;
            if url.origin() != self.origin.origin() {
                return Err(ShellError::config(format!(
                    "shell asset {} is not on the worker origin",
                    url
                )));
            }
        }
        Ok(())
    }

    /// Resolve a site path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, NetError> {
        resolve(&self.origin, path)
    }

    /// Absolute URLs of the shell manifest.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, NetError> {
        self.shell_manifest.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn fallback_url(&self) -> Result<Url, NetError> {
        self.resolve(&self.offline_fallback)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.install_retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name, "powerfit-gym-v1");
        assert_eq!(config.shell_manifest.len(), 7);
        assert!(config.validate().is_ok());

        let urls = config.manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "http://localhost:8080/");
        assert_eq!(urls[6].path(), "/icons/icon-512x512.png");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{ "origin": "https://powerfit.example/", "cache_name": "powerfit-gym-v2" }"#,
        )
        .unwrap();

        assert_eq!(config.cache_name, "powerfit-gym-v2");
        assert_eq!(config.sync.contact_form_tag, "contact-form");
        assert_eq!(config.notifications.vibrate, vec![100, 50, 100]);
        assert_eq!(
            config.fallback_url().unwrap().as_str(),
            "https://powerfit.example/index.html"
        );
    }

    #[test]
    fn test_fallback_must_be_cached() {
        let config = WorkerConfig {
            offline_fallback: "/offline.html".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cross_origin_manifest_rejected() {
        let mut config = WorkerConfig::default();
        config
            .shell_manifest
            .push("https://cdn.example/font.woff2".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{ "event_timeout_secs": 5 }"#).unwrap();

        let config = WorkerConfig::load(&path).unwrap();
        assert_eq!(config.event_timeout(), Duration::from_secs(5));

        std::fs::write(&path, "not json").unwrap();
        assert!(WorkerConfig::load(&path).is_err());
    }

    #[test]
    fn test_retry_conversion() {
        let config = WorkerConfig {
            install_retry: InstallRetryConfig {
                max_attempts: 1,
                initial_delay_ms: 5,
                max_delay_ms: 50,
            },
            ..Default::default()
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.initial_delay, Duration::from_millis(5));
    }
}
