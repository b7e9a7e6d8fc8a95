use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::connection::ConnectOptions;
use crate::engine::WebRtcEngineConfig;
use crate::poller::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL, PollerConfig};

pub const DEFAULT_SIGNALING_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_GREETING: &str = "hello there";
pub const DEFAULT_CHANNEL_LABEL: &str = "data";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_SIGNALING_URL: &str = "RTC_RELAY_SIGNALING_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "RTC_RELAY_POLL_INTERVAL_MS";
pub const ENV_POLL_MAX_ATTEMPTS: &str = "RTC_RELAY_POLL_MAX_ATTEMPTS";
pub const ENV_ICE_SERVERS: &str = "RTC_RELAY_ICE_SERVERS";
pub const ENV_SCOPE_CANDIDATES: &str = "RTC_RELAY_SCOPE_CANDIDATES";
pub const ENV_GREETING: &str = "RTC_RELAY_GREETING";
pub const ENV_HTTP_TIMEOUT_MS: &str = "RTC_RELAY_HTTP_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid signaling url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("{name} must be a boolean, got {value:?}")]
    InvalidFlag { name: &'static str, value: String },
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the signaling relay
    pub signaling_url: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    /// STUN/TURN urls; empty means host candidates only
    pub ice_servers: Vec<String>,
    /// Tag candidate requests with the assigned connection id
    pub scope_candidates: bool,
    /// Sent once when the data channel opens; `None` disables it
    pub greeting: Option<String>,
    pub http_timeout: Duration,
    pub channel_label: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_max_attempts: DEFAULT_MAX_ATTEMPTS,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            scope_candidates: true,
            greeting: Some(DEFAULT_GREETING.to_string()),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_SIGNALING_URL) {
            config.signaling_url = parse_signaling_url(&raw)?;
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll_interval =
                Duration::from_millis(parse_positive(ENV_POLL_INTERVAL_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_POLL_MAX_ATTEMPTS) {
            let attempts = parse_positive(ENV_POLL_MAX_ATTEMPTS, &raw)?;
            config.poll_max_attempts =
                u32::try_from(attempts).map_err(|_| ConfigError::InvalidNumber {
                    name: ENV_POLL_MAX_ATTEMPTS,
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = lookup(ENV_ICE_SERVERS) {
            config.ice_servers = raw
                .split(',')
                .map(str::trim)
                .filter(|server| !server.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = lookup(ENV_SCOPE_CANDIDATES) {
            config.scope_candidates = parse_flag(ENV_SCOPE_CANDIDATES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_GREETING) {
            config.greeting = if raw.is_empty() { None } else { Some(raw) };
        }
        if let Some(raw) = lookup(ENV_HTTP_TIMEOUT_MS) {
            config.http_timeout =
                Duration::from_millis(parse_positive(ENV_HTTP_TIMEOUT_MS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_signaling_url(&self.signaling_url)?;
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero {
                name: "poll interval",
            });
        }
        if self.poll_max_attempts == 0 {
            return Err(ConfigError::Zero {
                name: "poll max attempts",
            });
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "http timeout",
            });
        }
        Ok(())
    }

    pub fn with_signaling_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.signaling_url = parse_signaling_url(raw)?;
        Ok(self)
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            max_attempts: self.poll_max_attempts,
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            channel_label: self.channel_label.clone(),
            greeting: self.greeting.clone(),
            poller: self.poller(),
            scope_candidates: self.scope_candidates,
            ..ConnectOptions::default()
        }
    }

    pub fn engine(&self) -> WebRtcEngineConfig {
        WebRtcEngineConfig {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        }
    }
}

/// Returns the normalised url text.
pub fn parse_signaling_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    // Prefer IPv4 loopback over ::1.
    let normalized = trimmed.replacen("://localhost", "://127.0.0.1", 1);
    let url = Url::parse(&normalized).map_err(|err| ConfigError::InvalidUrl {
        value: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url.into()),
        other => Err(ConfigError::InvalidUrl {
            value: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        })?;
    if value == 0 {
        return Err(ConfigError::Zero { name });
    }
    Ok(value)
}

fn parse_flag(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_client() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.signaling_url, "http://127.0.0.1:8000");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.poll_max_attempts, 3);
        assert_eq!(config.ice_servers, vec![DEFAULT_ICE_SERVER.to_string()]);
        assert!(config.scope_candidates);
        assert_eq!(config.greeting.as_deref(), Some("hello there"));
        assert_eq!(config.channel_label, "data");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_SIGNALING_URL, "http://localhost:9000/relay"),
            (ENV_POLL_INTERVAL_MS, "250"),
            (ENV_POLL_MAX_ATTEMPTS, "5"),
            (ENV_ICE_SERVERS, "stun:a.example:3478, ,stun:b.example:3478"),
            (ENV_SCOPE_CANDIDATES, "off"),
            (ENV_GREETING, ""),
            (ENV_HTTP_TIMEOUT_MS, "1500"),
        ]))
        .unwrap();
        assert_eq!(config.signaling_url, "http://127.0.0.1:9000/relay");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.poll_max_attempts, 5);
        assert_eq!(
            config.ice_servers,
            vec!["stun:a.example:3478".to_string(), "stun:b.example:3478".to_string()]
        );
        assert!(!config.scope_candidates);
        assert_eq!(config.greeting, None);
        assert_eq!(config.http_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_POLL_INTERVAL_MS, "0")])),
            Err(ConfigError::Zero { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_POLL_MAX_ATTEMPTS, "three")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_SIGNALING_URL, "ftp://relay")])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_SCOPE_CANDIDATES, "maybe")])),
            Err(ConfigError::InvalidFlag { .. })
        ));
    }

    #[test]
    fn from_env_reads_process_environment() {
        let _lock = ENV_MUTEX.lock().unwrap();

        let original = env::var(ENV_POLL_MAX_ATTEMPTS).ok();
        unsafe {
            env::set_var(ENV_POLL_MAX_ATTEMPTS, "7");
        }
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.poll_max_attempts, 7);

        unsafe {
            if let Some(orig) = original {
                env::set_var(ENV_POLL_MAX_ATTEMPTS, orig);
            } else {
                env::remove_var(ENV_POLL_MAX_ATTEMPTS);
            }
        }
    }

    #[test]
    fn connect_options_follow_config() {
        let config = ClientConfig {
            greeting: None,
            scope_candidates: false,
            ..ClientConfig::default()
        };
        let options = config.connect_options();
        assert_eq!(options.channel_label, "data");
        assert_eq!(options.greeting, None);
        assert!(!options.scope_candidates);
        assert_eq!(options.poller, PollerConfig::default());
    }
}
