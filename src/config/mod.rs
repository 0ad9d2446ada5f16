//! Gateway configuration: TOML file with `CLINIGATE_*` environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub fn get_clinigate_home() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".clinigate"))
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_clinigate_home()?.join("config.toml"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the collaborator backend (button notifications).
    #[serde(default = "default_backend_url", rename = "baseUrl")]
    pub base_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Full URL of the conversational-AI endpoint.
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ai_timeout", rename = "timeoutSecs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ai_endpoint(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Directory for the transport's credential store. Defaults to
    /// `~/.clinigate/whatsapp`.
    #[serde(default, rename = "sessionDir")]
    pub session_dir: Option<PathBuf>,
}

impl WhatsAppConfig {
    pub fn session_dir(&self) -> Result<PathBuf> {
        match &self.session_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(get_clinigate_home()?.join("whatsapp")),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ai_endpoint() -> String {
    "http://localhost:8000/api/ai/chat".to_string()
}

fn default_ai_timeout() -> u64 {
    30
}

/// Load configuration from the given path (or the default location),
/// falling back to defaults when no file exists, then apply environment
/// overrides.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"));
    let path = config_path.unwrap_or(default_path.as_path());

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(host) = std::env::var("CLINIGATE_HOST")
        && !host.is_empty()
    {
        config.gateway.host = host;
    }
    if let Ok(port) = std::env::var("CLINIGATE_PORT")
        && let Ok(port) = port.parse()
    {
        config.gateway.port = port;
    }
    if let Ok(url) = std::env::var("CLINIGATE_BACKEND_URL")
        && !url.is_empty()
    {
        config.backend.base_url = url;
    }
    if let Ok(endpoint) = std::env::var("CLINIGATE_AI_ENDPOINT")
        && !endpoint.is_empty()
    {
        config.ai.endpoint = endpoint;
    }
    if let Ok(dir) = std::env::var("CLINIGATE_SESSION_DIR")
        && !dir.is_empty()
    {
        config.whatsapp.session_dir = Some(PathBuf::from(dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 3001);
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.ai.timeout_secs, 30);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            port = 4100

            [backend]
            baseUrl = "http://backend.internal:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 4100);
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.backend.base_url, "http://backend.internal:9000");
        assert_eq!(config.ai.endpoint, "http://localhost:8000/api/ai/chat");
    }

    #[test]
    fn load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.gateway.port, 3001);
    }

    #[test]
    fn load_config_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "gateway = nonsense").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
