//! Account credentials and client configuration.
//!
//! Defaults reproduce the values the vendor's Android app sends; callers
//! normally only change the region and perhaps the locale cookies.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Region whose API host has no subdomain prefix.
pub const MAINLAND_REGION: &str = "cn";

/// Errors raised while loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),
    #[error("environment variable {name} is invalid: {reason}")]
    InvalidVar { name: &'static str, reason: String },
}

/// Account credentials supplied once when the client is constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub region: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            region: region.into(),
        }
    }

    /// Reads `MICLOUD_USERNAME`, `MICLOUD_PASSWORD` and `MICLOUD_REGION`.
    ///
    /// `CLOUD_USERNAME` / `CLOUD_PASSWORD` are accepted as fallbacks and the
    /// region defaults to `cn`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = env_any(&["MICLOUD_USERNAME", "CLOUD_USERNAME"])
            .ok_or(ConfigError::MissingVar("MICLOUD_USERNAME"))?;
        let password = env_any(&["MICLOUD_PASSWORD", "CLOUD_PASSWORD"])
            .ok_or(ConfigError::MissingVar("MICLOUD_PASSWORD"))?;
        let region = env_any(&["MICLOUD_REGION"]).unwrap_or_else(|| MAINLAND_REGION.to_string());
        Ok(Self::new(username, password, region))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Endpoint, timeout and cookie settings for the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Account service base, e.g. `https://account.xiaomi.com`.
    pub account_base: String,
    /// Callback registered with the account service during step 2.
    pub sts_callback: String,
    pub api_scheme: String,
    pub api_host: String,
    pub login_timeout_ms: u64,
    pub redirect_timeout_ms: u64,
    pub rpc_timeout_ms: u64,
    pub locale: String,
    pub timezone: String,
    pub is_daylight: String,
    pub dst_offset: String,
    pub channel: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            account_base: "https://account.xiaomi.com".into(),
            sts_callback: "https://sts.api.io.mi.com/sts".into(),
            api_scheme: "https".into(),
            api_host: "api.io.mi.com".into(),
            login_timeout_ms: 10_000,
            redirect_timeout_ms: 3_000,
            rpc_timeout_ms: 10_000,
            locale: "en_GB".into(),
            timezone: "GMT+02:00".into(),
            is_daylight: "1".into(),
            dst_offset: "3600000".into(),
            channel: "MI_APP_STORE".into(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `MICLOUD_LOCALE`, `MICLOUD_TIMEZONE` and
    /// `MICLOUD_RPC_TIMEOUT_MS` when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(locale) = env_any(&["MICLOUD_LOCALE"]) {
            config.locale = locale;
        }
        if let Some(timezone) = env_any(&["MICLOUD_TIMEZONE"]) {
            config.timezone = timezone;
        }
        if let Some(raw) = env_any(&["MICLOUD_RPC_TIMEOUT_MS"]) {
            config.rpc_timeout_ms = raw.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidVar {
                    name: "MICLOUD_RPC_TIMEOUT_MS",
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(config)
    }

    pub fn service_login_url(&self) -> String {
        format!("{}/pass/serviceLogin?sid=xiaomiio&_json=true", self.account_base)
    }

    pub fn service_login_auth_url(&self) -> String {
        format!("{}/pass/serviceLoginAuth2", self.account_base)
    }

    /// API base for `region`, without trailing slash: `https://de.api.io.mi.com/app`.
    pub fn api_base(&self, region: &str) -> String {
        let prefix = if region.is_empty() || region == MAINLAND_REGION {
            String::new()
        } else {
            format!("{region}.")
        };
        format!("{}://{}{}/app", self.api_scheme, prefix, self.api_host)
    }

    pub fn api_url(&self, region: &str, path: &str) -> String {
        format!("{}{}", self.api_base(region), path)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn redirect_timeout(&self) -> Duration {
        Duration::from_millis(self.redirect_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
}
