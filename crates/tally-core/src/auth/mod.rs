//! Credential sources for the stream and render services.
//!
//! The stream transport carries the credential inside the request URL by
//! default, so a credential is fetched fresh for every submission and
//! dropped as soon as the request has been built.

use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroizing;

pub const TOKEN_ENV_VAR: &str = "TALLY_TOKEN";

/// A bearer credential. The secret is wiped from memory on drop and never
/// appears in `Debug` output.
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    /// Returns `None` for an empty or whitespace-only token.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = Zeroizing::new(token.into());
        if token.trim().is_empty() {
            return None;
        }
        Some(Self(token))
    }

    pub fn expose(&self) -> &str {
        self.0.trim()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Supplies the current credential, or `None` when the user must sign in.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Option<Credential>;
}

/// A fixed credential, typically taken from a command-line flag.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    credential: Option<Credential>,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn token(&self) -> Option<Credential> {
        self.credential.clone()
    }
}

/// Reads the credential from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    var: String,
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

impl EnvCredentialProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn token(&self) -> Option<Credential> {
        match std::env::var(&self.var) {
            Ok(value) => Credential::new(value),
            Err(_) => {
                tracing::debug!(var = %self.var, "No credential in environment");
                None
            }
        }
    }
}
