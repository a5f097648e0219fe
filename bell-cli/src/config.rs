use std::fs;
use std::path::{Path, PathBuf};

use notification_sync::{EngineConfig, HttpConfig, WsConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

const CONFIG_FILE: &str = "config.toml";

/// Settings loaded from `config.toml`, then overridden by `BELL_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default role when `--role` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Default recipient id when `--recipient` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub http: HttpConfig,
    pub push: WsConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load from `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading configuration");
                toml::from_str(&fs::read_to_string(&path)?)?
            }
            _ => AppConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Write the defaults to `path` (or the default location).
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(default_path)
            .ok_or_else(|| {
                crate::error::AppError::InvalidInput("no configuration directory".to_string())
            })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(&AppConfig::default())?)?;
        Ok(path)
    }

    /// Render for `config --show`; the token is masked.
    pub fn show(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.http.bearer_token.is_some() {
            shown.http.bearer_token = Some("********".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("BELL_API_URL") {
            self.http.base_url = url;
        }
        if let Some(token) = var("BELL_TOKEN") {
            self.http.bearer_token = Some(token);
        }
        if let Some(url) = var("BELL_WS_URL") {
            self.push.url = url;
        }
        if let Some(secs) = var("BELL_POLL_SECS").and_then(|s| s.parse().ok()) {
            self.engine.poll_interval_secs = Some(secs);
        }
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bell").join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notification_sync::SnapshotReadPolicy;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
role = "mentor"

[http]
base_url = "https://dash.example.com/api"

[engine]
capacity = 20
snapshot_read_policy = "authoritative"

[engine.reconnect]
max_attempts = 2
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.role.as_deref(), Some("mentor"));
        assert_eq!(config.http.base_url, "https://dash.example.com/api");
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.engine.capacity, 20);
        assert_eq!(config.engine.fetch_limit, 50);
        assert_eq!(
            config.engine.snapshot_read_policy,
            SnapshotReadPolicy::Authoritative
        );
        assert_eq!(config.engine.reconnect.max_attempts, 2);
        assert_eq!(config.push, WsConfig::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BELL_API_URL", "https://api.test"),
            ("BELL_TOKEN", "secret"),
            ("BELL_POLL_SECS", "15"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.http.base_url, "https://api.test");
        assert_eq!(config.http.bearer_token.as_deref(), Some("secret"));
        assert_eq!(config.engine.poll_interval_secs, Some(15));
        assert_eq!(config.push, WsConfig::default());
    }

    #[test]
    fn test_reset_and_show() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        AppConfig::reset(Some(&path)).unwrap();

        let written: AppConfig = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, AppConfig::default());

        let mut config = AppConfig::default();
        config.http.bearer_token = Some("secret".to_string());
        let shown = config.show().unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("********"));
    }
}
