//! Client configuration
//!
//! Settings are resolved in layers: built-in defaults, the user file
//! (`~/.neoscaffold/neoscaffold.toml`), the project file
//! (`./.neoscaffold/neoscaffold.toml`), then environment overrides
//! (`NEOSCAFFOLD_URL`, `NEOSCAFFOLD_AUTH_ENABLED`). Explicit files may be
//! TOML, YAML or JSON.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::storage::USER_INFO_KEY;

/// Environment variable overriding the backend URL.
pub const URL_ENV: &str = "NEOSCAFFOLD_URL";

/// Environment variable enabling authenticated sessions.
pub const AUTH_ENABLED_ENV: &str = "NEOSCAFFOLD_AUTH_ENABLED";

/// Backend connection and client behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Base URL of the backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Whether requests carry session credentials.
    #[serde(default)]
    pub auth_enabled: bool,

    /// Storage key of the session record.
    #[serde(default = "default_session_key")]
    pub session_key: String,

    /// Whether the hosting page is served over TLS. Falls back to the base
    /// URL's scheme when unset.
    #[serde(default)]
    pub secure_page: Option<bool>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Socket health check period.
    #[serde(default = "default_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Workflow autosave period.
    #[serde(default = "default_interval_ms")]
    pub autosave_interval_ms: u64,

    /// Directory for persisted client state.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_url() -> String {
    "http://localhost:6166".to_string()
}

fn default_session_key() -> String {
    USER_INFO_KEY.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".neoscaffold")
        .join("state")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_enabled: false,
            session_key: default_session_key(),
            secure_page: None,
            request_timeout_secs: default_request_timeout(),
            reconnect_interval_ms: default_interval_ms(),
            autosave_interval_ms: default_interval_ms(),
            state_dir: default_state_dir(),
            log_level: default_log_level(),
        }
    }
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_auth(mut self, enabled: bool) -> Self {
        self.auth_enabled = enabled;
        self
    }

    pub fn with_secure_page(mut self, secure: bool) -> Self {
        self.secure_page = Some(secure);
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Storage key of the session, only when authentication is enabled.
    pub fn session_key(&self) -> Option<&str> {
        self.auth_enabled.then_some(self.session_key.as_str())
    }

    /// Whether the socket should use TLS.
    pub fn is_secure(&self) -> bool {
        self.secure_page
            .unwrap_or_else(|| self.base_url.starts_with("https://"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms.max(1))
    }

    /// Overlay a partial settings file.
    pub fn merge(&mut self, other: PartialSettings) {
        if let Some(v) = other.base_url {
            self.base_url = v;
        }
        if let Some(v) = other.auth_enabled {
            self.auth_enabled = v;
        }
        if let Some(v) = other.session_key {
            self.session_key = v;
        }
        if let Some(v) = other.secure_page {
            self.secure_page = Some(v);
        }
        if let Some(v) = other.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = other.reconnect_interval_ms {
            self.reconnect_interval_ms = v;
        }
        if let Some(v) = other.autosave_interval_ms {
            self.autosave_interval_ms = v;
        }
        if let Some(v) = other.state_dir {
            self.state_dir = v;
        }
        if let Some(v) = other.log_level {
            self.log_level = v;
        }
    }

    /// Apply `NEOSCAFFOLD_URL` and `NEOSCAFFOLD_AUTH_ENABLED`.
    pub fn apply_env(&mut self) {
        if let Some(url) = get_env(URL_ENV) {
            self.base_url = url;
        }
        self.auth_enabled = get_env_bool_or(AUTH_ENABLED_ENV, self.auth_enabled);
    }
}

/// Settings as read from a file; absent fields keep the lower layer's value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PartialSettings {
    pub base_url: Option<String>,
    pub auth_enabled: Option<bool>,
    pub session_key: Option<String>,
    pub secure_page: Option<bool>,
    pub request_timeout_secs: Option<u64>,
    pub reconnect_interval_ms: Option<u64>,
    pub autosave_interval_ms: Option<u64>,
    pub state_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Non-empty environment variable.
pub fn get_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Boolean environment variable with a default for unset or unparsable values.
pub fn get_env_bool_or(key: &str, default: bool) -> bool {
    match get_env(key).map(|v| v.to_lowercase()) {
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

/// Parse settings text according to the file extension.
pub fn parse_settings(path: &Path, content: &str) -> Result<PartialSettings> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(toml::from_str(content)?),
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(content)?),
        Some("json") => Ok(serde_json::from_str(content)?),
        other => Err(ClientError::Config(format!(
            "Unsupported config format: {:?}",
            other
        ))),
    }
}

/// Loads [`ClientSettings`] from the user and project locations.
pub struct ConfigLoader {
    user_config_path: PathBuf,
    project_config_path: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        let user_root = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_paths(
            user_root.join(".neoscaffold").join("neoscaffold.toml"),
            project_root.join(".neoscaffold").join("neoscaffold.toml"),
        )
    }

    pub fn with_paths(user_config_path: PathBuf, project_config_path: PathBuf) -> Self {
        Self {
            user_config_path,
            project_config_path,
        }
    }

    /// Defaults, then user file, then project file, then environment.
    pub async fn load(&self) -> Result<ClientSettings> {
        let mut settings = ClientSettings::default();

        for path in [&self.user_config_path, &self.project_config_path] {
            if let Some(partial) = self.load_optional(path).await? {
                settings.merge(partial);
            }
        }

        settings.apply_env();
        Ok(settings)
    }

    /// Defaults, then an explicit file, then environment.
    pub async fn load_file(&self, path: &Path) -> Result<ClientSettings> {
        let content = fs::read_to_string(path).await?;
        let mut settings = ClientSettings::default();
        settings.merge(parse_settings(path, &content)?);
        settings.apply_env();
        Ok(settings)
    }

    async fn load_optional(&self, path: &Path) -> Result<Option<PartialSettings>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "loading config");
        let content = fs::read_to_string(path).await?;
        parse_settings(path, &content).map(Some)
    }

    pub fn user_config_path(&self) -> &Path {
        &self.user_config_path
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
