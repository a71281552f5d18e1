//! Configuration management for Floodgate.
//!
//! Configuration is read once at process startup, from an optional YAML file
//! overlaid with `FLOODGATE__`-prefixed environment variables
//! (for example `FLOODGATE__STORE__URL` or `FLOODGATE__STORE__PASSWORD`).

use redis::IntoConnectionInfo;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::Algorithm;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "FLOODGATE";

/// Main configuration for Floodgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Counter store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Limiter behaviour
    #[serde(default)]
    pub limiter: LimiterSettings,
}

/// Counter store connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store endpoint, e.g. `redis://cache.internal:6379/0`
    #[serde(default)]
    pub url: String,

    /// ACL username, if not embedded in the URL
    #[serde(default)]
    pub username: Option<String>,

    /// Credential, if not embedded in the URL
    #[serde(default)]
    pub password: Option<String>,

    /// Permit connecting without any credential
    #[serde(default)]
    pub allow_anonymous: bool,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &redact_url(&self.url))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("allow_anonymous", &self.allow_anonymous)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            allow_anonymous: false,
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    2000
}

impl StoreConfig {
    /// Connection establishment timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whether a credential is available, either configured separately or
    /// embedded in the URL (userinfo, or `?pass=` for unix sockets).
    pub fn has_credential(&self) -> bool {
        self.password.is_some()
            || self
                .url
                .as_str()
                .into_connection_info()
                .is_ok_and(|info| info.redis.password.is_some())
    }
}

/// Limiter behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Namespace prepended to every limiter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Algorithm used when the caller does not pick one
    #[serde(default)]
    pub default_algorithm: Algorithm,

    /// Per-check store timeout in milliseconds; exceeding it fails open
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Path to a YAML file of named policies
    #[serde(default)]
    pub policies_path: Option<String>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            default_algorithm: Algorithm::default(),
            store_timeout_ms: default_store_timeout(),
            policies_path: None,
        }
    }
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

fn default_store_timeout() -> u64 {
    250
}

impl LimiterSettings {
    /// Per-check store timeout.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl FloodgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| FloodgateError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// environment variables, then validate it.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(path, config::FileFormat::Yaml).required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: FloodgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the store can be reached with the configured settings.
    pub fn validate(&self) -> Result<()> {
        if self.store.url.trim().is_empty() {
            return Err(FloodgateError::Config(format!(
                "store endpoint is not set (store.url or {}__STORE__URL)",
                ENV_PREFIX
            )));
        }
        if !self.store.allow_anonymous && !self.store.has_credential() {
            return Err(FloodgateError::Config(format!(
                "store credential is not set (store.password or {}__STORE__PASSWORD)",
                ENV_PREFIX
            )));
        }
        if self.limiter.key_prefix.is_empty() {
            return Err(FloodgateError::Config(
                "limiter.key_prefix must not be empty".to_string(),
            ));
        }
        if self.limiter.store_timeout_ms == 0 {
            return Err(FloodgateError::Config(
                "limiter.store_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

const REDACTED: &str = "***";

/// Query parameters that carry a credential.
const SECRET_PARAMS: [&str; 2] = ["pass", "password"];

/// The URL with any password masked. Unparseable URLs are masked whole.
fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return REDACTED.to_string();
    };

    if url.password().is_some() && url.set_password(Some(REDACTED)).is_err() {
        return REDACTED.to_string();
    }

    if url.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(name, value)| {
                let value = if SECRET_PARAMS.iter().any(|secret| *secret == name) {
                    REDACTED.to_string()
                } else {
                    value.into_owned()
                };
                (name.into_owned(), value)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    url.to_string()
}
