//! Server configuration
//!
//! Values come from an optional JSON file named by `RENDEZVOUS_CONFIG`, then
//! individual environment variables override them:
//!
//! - `RENDEZVOUS_ALLOWED_ORIGINS` - comma-separated CORS origins, `*` for any
//! - `RENDEZVOUS_IDLE_TIMEOUT_SECS` - silence before a connection is dropped
//! - `RENDEZVOUS_STATE_FILE` - where to keep gateway state between requests

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE_VAR: &str = "RENDEZVOUS_CONFIG";
const ALLOWED_ORIGINS_VAR: &str = "RENDEZVOUS_ALLOWED_ORIGINS";
const IDLE_TIMEOUT_VAR: &str = "RENDEZVOUS_IDLE_TIMEOUT_SECS";
const STATE_FILE_VAR: &str = "RENDEZVOUS_STATE_FILE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Connections silent for longer than this are disconnected
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Persist gateway state here between requests. Needed when the runtime
    /// starts a fresh instance per request, as `wasmtime serve` does.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "https://oblique-phi.vercel.app".to_string(),
    ]
}

fn default_idle_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            idle_timeout_secs: default_idle_timeout_secs(),
            state_file: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of variables
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let mut config = match vars.get(CONFIG_FILE_VAR) {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                serde_json::from_str(&contents)?
            }
            None => Self::default(),
        };

        if let Some(origins) = vars.get(ALLOWED_ORIGINS_VAR) {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(secs) = vars.get(IDLE_TIMEOUT_VAR) {
            config.idle_timeout_secs = secs.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: IDLE_TIMEOUT_VAR,
                value: secs.clone(),
            })?;
        }

        if let Some(path) = vars.get(STATE_FILE_VAR) {
            config.state_file = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allows_any_origin() || self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_variables() {
        let config = Config::from_vars(Vec::new()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert!(config.allows_origin("http://localhost:3000"));
        assert!(!config.allows_origin("https://evil.example"));
    }

    #[test]
    fn environment_overrides() {
        let config = Config::from_vars(vars(&[
            (ALLOWED_ORIGINS_VAR, "https://a.example, https://b.example,"),
            (IDLE_TIMEOUT_VAR, "15"),
            (STATE_FILE_VAR, "/tmp/rendezvous.json"),
        ]))
        .unwrap();

        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.idle_timeout_secs, 15);
        assert_eq!(config.state_file, Some(PathBuf::from("/tmp/rendezvous.json")));
    }

    #[test]
    fn wildcard_allows_everything() {
        let config = Config::from_vars(vars(&[(ALLOWED_ORIGINS_VAR, "*")])).unwrap();
        assert!(config.allows_origin("https://anything.example"));
    }

    #[test]
    fn invalid_timeout_is_an_error() {
        let err = Config::from_vars(vars(&[(IDLE_TIMEOUT_VAR, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: IDLE_TIMEOUT_VAR, .. }));
    }

    #[test]
    fn file_values_are_overridden_by_environment() {
        let path = std::env::temp_dir().join(format!("rendezvous-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"idle_timeout_secs": 30, "allowed_origins": ["*"]}"#).unwrap();

        let config = Config::from_vars(vars(&[
            (CONFIG_FILE_VAR, path.to_str().unwrap()),
            (IDLE_TIMEOUT_VAR, "45"),
        ]))
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(config.allows_any_origin());
        assert_eq!(config.idle_timeout_secs, 45);
    }
}
