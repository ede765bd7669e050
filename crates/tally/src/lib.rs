pub mod cli;
pub mod commands;
pub mod output;

pub use tally_core::{api, app, auth, config, utils};

use std::path::Path;
use std::sync::Arc;
use tally_core::app::{SessionHandle, SessionRuntime};
use tally_core::auth::{CredentialProvider, EnvCredentialProvider, StaticCredentialProvider};
use tally_core::config::ClientConfig;

/// Loads the config file and applies the command-line base URL override.
pub fn load_client_config(
    path: Option<&Path>,
    base_url: Option<&str>,
) -> tally_core::Result<ClientConfig> {
    let mut config = ClientConfig::load(path)?;
    if let Some(base_url) = base_url {
        config.set_base_url(base_url)?;
    }
    Ok(config)
}

/// A fixed token when one was given, otherwise `TALLY_TOKEN` read on every
/// submission.
pub fn credential_provider(token: Option<&str>) -> Arc<dyn CredentialProvider> {
    match token {
        Some(token) => Arc::new(StaticCredentialProvider::new(token)),
        None => Arc::new(EnvCredentialProvider::default()),
    }
}

pub fn spawn_session(
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
) -> tally_core::Result<SessionHandle> {
    tracing::debug!(base_url = %config.base_url, "Starting session");
    Ok(SessionRuntime::spawn_http(Arc::new(config), credentials)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn base_url_flag_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "base_url = \"https://file.example.com\"").unwrap();
        writeln!(file, "request_timeout_secs = 12").unwrap();

        let config = load_client_config(Some(&path), Some("https://flag.example.com")).unwrap();

        assert_eq!(config.base_url.as_str(), "https://flag.example.com/");
        assert_eq!(config.request_timeout_secs, 12);
    }

    #[test]
    fn invalid_base_url_flag_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let err = load_client_config(Some(&path), Some("::nope::")).unwrap_err();
        assert!(matches!(err, tally_core::Error::Configuration(_)));
    }

    #[tokio::test]
    async fn explicit_token_is_used() {
        let provider = credential_provider(Some("abc"));
        assert_eq!(provider.token().await.unwrap().expose(), "abc");
    }
}
