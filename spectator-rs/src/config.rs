use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::lifecycle::ReconnectOptions;
use crate::ws_url::WsUrlBuilder;

pub const WS_URL_VAR: &str = "SPECTATOR_WS_URL";
pub const BASE_URL_VAR: &str = "SPECTATOR_BASE_URL";
pub const STATE_DIR_VAR: &str = "SPECTATOR_STATE_DIR";
pub const MAX_RETRIES_VAR: &str = "SPECTATOR_MAX_RETRIES";
pub const CONNECT_TIMEOUT_VAR: &str = "SPECTATOR_CONNECT_TIMEOUT_MS";

#[derive(Clone, Debug)]
pub struct SpectatorConfig {
    pub urls: WsUrlBuilder,
    /// Where the spectator id is persisted. `None` keeps it in memory.
    pub state_dir: Option<PathBuf>,
    pub reconnect: ReconnectOptions,
}

impl SpectatorConfig {
    /// Read the configuration from the environment, after loading `.env` if there is one.
    ///
    /// `overrides` is consulted first, so command-line flags can shadow variables.
    pub fn from_env(overrides: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("Ignoring unreadable .env file: {e}");
            }
        }
        Self::from_vars(|var| overrides(var).or_else(|| std::env::var(var).ok()))
    }

    /// Build a configuration from `lookup`, which maps variable names to values.
    ///
    /// An explicit realtime origin wins over the HTTP base origin.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let origin = get(WS_URL_VAR)
            .or_else(|| get(BASE_URL_VAR))
            .ok_or(ConfigError::MissingBaseUrl)?;
        let urls = WsUrlBuilder::new(origin.trim())?;

        let mut reconnect = ReconnectOptions::default();
        if let Some(value) = get(MAX_RETRIES_VAR) {
            reconnect.max_retries = parse_number(MAX_RETRIES_VAR, &value)?;
        }
        if let Some(value) = get(CONNECT_TIMEOUT_VAR) {
            reconnect.connection_timeout =
                Duration::from_millis(parse_number(CONNECT_TIMEOUT_VAR, &value)?);
        }

        Ok(Self {
            urls,
            state_dir: get(STATE_DIR_VAR).map(PathBuf::from),
            reconnect,
        })
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<SpectatorConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SpectatorConfig::from_vars(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_base_url_is_translated() {
        let config = config(&[(BASE_URL_VAR, "https://debate.example.com")]).unwrap();
        assert_eq!(config.urls.origin().as_str(), "wss://debate.example.com/");
        assert_eq!(config.state_dir, None);
        assert_eq!(config.reconnect, ReconnectOptions::default());
    }

    #[test]
    fn test_ws_url_wins() {
        let config = config(&[
            (BASE_URL_VAR, "https://debate.example.com"),
            (WS_URL_VAR, "ws://localhost:1313"),
            (STATE_DIR_VAR, "/tmp/spectator"),
        ])
        .unwrap();
        assert_eq!(config.urls.origin().as_str(), "ws://localhost:1313/");
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/spectator")));
    }

    #[test]
    fn test_missing_and_bad_values() {
        assert!(matches!(config(&[]), Err(ConfigError::MissingBaseUrl)));
        assert!(matches!(
            config(&[(WS_URL_VAR, "  ")]),
            Err(ConfigError::MissingBaseUrl)
        ));
        assert!(matches!(
            config(&[(BASE_URL_VAR, "gopher://x")]),
            Err(ConfigError::Url(_))
        ));
        assert!(matches!(
            config(&[(BASE_URL_VAR, "http://x"), (MAX_RETRIES_VAR, "lots")]),
            Err(ConfigError::InvalidNumber { var: MAX_RETRIES_VAR, .. })
        ));
    }

    #[test]
    fn test_overrides_shadow_the_environment() {
        let config = SpectatorConfig::from_env(|var| match var {
            WS_URL_VAR => Some("wss://override.example.com".to_string()),
            MAX_RETRIES_VAR => Some("4".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.urls.origin().as_str(), "wss://override.example.com/");
        assert_eq!(config.reconnect.max_retries, 4);
    }

    #[test]
    fn test_reconnect_overrides() {
        let config = config(&[
            (BASE_URL_VAR, "http://x"),
            (MAX_RETRIES_VAR, "3"),
            (CONNECT_TIMEOUT_VAR, "1500"),
        ])
        .unwrap();
        assert_eq!(config.reconnect.max_retries, 3);
        assert_eq!(
            config.reconnect.connection_timeout,
            Duration::from_millis(1500)
        );
    }
}
