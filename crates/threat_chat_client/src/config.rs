//! Shared config load/save for `~/.threat-chat/config.yaml`.
//! Sections: `api.*` (model backend), `server.*` (listener, store, prompt),
//! `chat.*` (generation defaults). Environment variables override the file.

use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_MODEL_NAME: &str = "deepseek-chat";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 120;

/// Env var naming an explicit config file path.
pub const CONFIG_ENV_VAR: &str = "THREAT_CHAT_CONFIG";

/// API section (base_url, api_key, model_name).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ApiSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// Server section (host, port, store_path, system_prompt, timeout, endpoint).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_timeout_secs: Option<u64>,
    /// Full WebSocket URL clients connect to. Defaults to `ws://host:port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Chat section (max_tokens, temperature).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Full config file.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub chat: ChatSection,
}

impl Config {
    /// Apply `API_KEY`, `BASE_URL`, `MODEL_NAME` and `WEBSOCKET_API_ENDPOINT`
    /// from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Same as [`Config::apply_env_overrides`] with an explicit lookup.
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("API_KEY") {
            self.api.api_key = Some(v);
        }
        if let Some(v) = get("BASE_URL") {
            self.api.base_url = Some(v);
        }
        if let Some(v) = get("MODEL_NAME") {
            self.api.model_name = Some(v);
        }
        if let Some(v) = get("WEBSOCKET_API_ENDPOINT") {
            self.server.endpoint = Some(v);
        }
    }

    pub fn model_name(&self) -> &str {
        self.api.model_name.as_deref().unwrap_or(DEFAULT_MODEL_NAME)
    }

    pub fn host(&self) -> &str {
        self.server.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.server.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn max_tokens(&self) -> u32 {
        self.chat.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn temperature(&self) -> f32 {
        self.chat.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn invocation_timeout_secs(&self) -> u64 {
        self.server
            .invocation_timeout_secs
            .unwrap_or(DEFAULT_INVOCATION_TIMEOUT_SECS)
    }

    /// WebSocket URL a client should connect to.
    pub fn endpoint(&self) -> String {
        match &self.server.endpoint {
            Some(url) => url.clone(),
            None => format!("ws://{}:{}", self.host(), self.port()),
        }
    }
}

/// Returns the default config file path: `~/.threat-chat/config.yaml` (platform-specific).
pub fn default_config_path() -> Option<PathBuf> {
    let home = home_dir()?;
    Some(home.join(".threat-chat").join("config.yaml"))
}

/// Resolve the config path: explicit override, then `THREAT_CHAT_CONFIG`, then default.
pub fn resolve_config_path(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = override_path {
        return Some(p.to_path_buf());
    }
    if let Ok(val) = std::env::var(CONFIG_ENV_VAR) {
        if !val.trim().is_empty() {
            return Some(PathBuf::from(val));
        }
    }
    default_config_path()
}

#[cfg(unix)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE").map(PathBuf::from)
}

#[cfg(not(any(unix, windows)))]
fn home_dir() -> Option<PathBuf> {
    None
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Load config if the file exists, otherwise start from defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(p) if p.exists() => load(p),
        Some(p) => {
            tracing::debug!(path = %p.display(), "config file not found, using defaults");
            Ok(Config::default())
        }
        None => Ok(Config::default()),
    }
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Config load/save error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_sections_missing() {
        let cfg = Config::default();
        assert_eq!(cfg.model_name(), "deepseek-chat");
        assert_eq!(cfg.max_tokens(), 4096);
        assert!((cfg.temperature() - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.invocation_timeout_secs(), 120);
        assert_eq!(cfg.endpoint(), "ws://127.0.0.1:8765");
    }

    #[test]
    fn overrides_replace_file_values_and_skip_blanks() {
        let mut cfg = Config::default();
        cfg.api.model_name = Some("from-file".into());
        cfg.api.base_url = Some("https://file.example".into());

        let env: HashMap<&str, &str> = [
            ("API_KEY", "sk-env"),
            ("MODEL_NAME", "from-env"),
            ("BASE_URL", "  "),
            ("WEBSOCKET_API_ENDPOINT", "wss://chat.example/prod"),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.api.api_key.as_deref(), Some("sk-env"));
        assert_eq!(cfg.model_name(), "from-env");
        assert_eq!(cfg.api.base_url.as_deref(), Some("https://file.example"));
        assert_eq!(cfg.endpoint(), "wss://chat.example/prod");
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_or_default(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_reports_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server: [unclosed").unwrap();
        assert!(matches!(load(&path), Err(ConfigError::Parse(_))));
    }
}
