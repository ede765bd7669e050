use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::app::domain::StreamingConfig;
use crate::app::domain::confirmation::{DEFAULT_CONFIRMATION_TTL_SECS, MAX_CONFIRMATION_TTL_SECS};
use crate::app::domain::frame::DEFAULT_COMPLETION_SENTINEL;
use crate::error::{Error, Result};
use crate::utils::AppPaths;

const DEFAULT_BASE_URL: &str = "http://localhost:3100";

/// Where the stream transport puts the credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialPlacement {
    /// `token=<credential>` in the query string. Works with transports that
    /// cannot attach headers to the push connection.
    #[default]
    Query,
    /// `Authorization: Bearer <credential>`.
    Header,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: Url,
    pub stream_path: String,
    pub render_path: String,
    pub confirm_path: String,
    pub credential_placement: CredentialPlacement,
    pub completion_sentinel: String,
    pub confirmation_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub expiry_tick_millis: u64,
}

impl Default for ClientConfig {
    #[expect(clippy::expect_used)]
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            stream_path: "/api/query".to_string(),
            render_path: "/api/display".to_string(),
            confirm_path: "/api/confirm".to_string(),
            credential_placement: CredentialPlacement::default(),
            completion_sentinel: DEFAULT_COMPLETION_SENTINEL.to_string(),
            confirmation_ttl_secs: DEFAULT_CONFIRMATION_TTL_SECS as u64,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            expiry_tick_millis: 1000,
        }
    }
}

impl ClientConfig {
    /// Loads the configuration from `path`, or from the user config file when
    /// no path is given.
    ///
    /// An explicit path must exist and parse. The user config file is optional;
    /// when it is unreadable or malformed a warning is logged and defaults are
    /// used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let contents = std::fs::read_to_string(path)?;
            return Self::from_toml_str(&contents);
        }

        let Some(path) = AppPaths::user_config_file() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        match std::fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|contents| Self::from_toml_str(&contents))
        {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    "Failed to load config file at {:?}: {}. Using defaults.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "base_url must be http or https, got {}",
                self.base_url
            )));
        }
        if self.completion_sentinel.trim().is_empty() {
            return Err(Error::Configuration(
                "completion_sentinel must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_CONFIRMATION_TTL_SECS.unsigned_abs()).contains(&self.confirmation_ttl_secs) {
            return Err(Error::Configuration(format!(
                "confirmation_ttl_secs must be between 1 and {MAX_CONFIRMATION_TTL_SECS} seconds"
            )));
        }
        if self.expiry_tick_millis == 0 {
            return Err(Error::Configuration(
                "expiry_tick_millis must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Replaces the base URL, e.g. from a command-line override.
    pub fn set_base_url(&mut self, raw: &str) -> Result<()> {
        let base_url = Url::parse(raw)
            .map_err(|e| Error::Configuration(format!("Invalid base URL '{raw}': {e}")))?;
        let previous = std::mem::replace(&mut self.base_url, base_url);
        if let Err(e) = self.validate() {
            self.base_url = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Joins `path` onto the base URL, keeping any path prefix of the base.
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        let suffix = path.trim_start_matches('/');
        url.set_path(&format!("{prefix}/{suffix}"));
        url
    }

    pub fn stream_url(&self) -> Url {
        self.endpoint(&self.stream_path)
    }

    pub fn render_url(&self) -> Url {
        self.endpoint(&self.render_path)
    }

    /// `{confirm_path}/{confirmation_id}`, with the id percent-encoded as a
    /// single path segment.
    pub fn confirm_url(&self, confirmation_id: &str) -> Url {
        let mut url = self.endpoint(&self.confirm_path);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(confirmation_id);
        }
        url
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn expiry_tick(&self) -> Duration {
        Duration::from_millis(self.expiry_tick_millis)
    }

    pub fn streaming_config(&self) -> StreamingConfig {
        let ttl = i64::try_from(self.confirmation_ttl_secs)
            .ok()
            .filter(|secs| (1..=MAX_CONFIRMATION_TTL_SECS).contains(secs))
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_CONFIRMATION_TTL_SECS));
        StreamingConfig {
            completion_sentinel: self.completion_sentinel.clone(),
            confirmation_ttl: ttl,
        }
    }
}
