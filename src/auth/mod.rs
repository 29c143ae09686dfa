//! Credential providers.
//!
//! A [`CredentialProvider`] hands out the bearer credential used for the
//! source or the destination organization. The provider is picked once at
//! startup from [`AuthMode`].
pub(crate) mod gh_cli;
pub(crate) mod oauth;
pub(crate) mod token;

use std::{fmt, future::Future, pin::Pin};

use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{errors::OrgBackupError, utils::Direction};

pub use gh_cli::GhCliProvider;
pub use oauth::{OAuthConfig, OAuthProvider};
pub use token::{TokenConfig, TokenProvider};

/// Bearer credential. The secret never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Raw secret
    secret: String,
}

impl Credential {
    /// Wrap a secret
    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The raw secret, for request headers and git callbacks only
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Short prefix safe to show to the user
    pub fn preview(&self) -> String {
        let shown: String = self.secret.chars().take(4).collect();
        format!("{shown}...")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Authentication mode
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Personal access tokens (flags, environment, config file or prompt)
    #[default]
    Token,
    /// Browser based OAuth with PKCE
    Oauth,
    /// Reuse the login of the GitHub CLI (`gh`)
    GhCli,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Token => write!(f, "token"),
            AuthMode::Oauth => write!(f, "oauth"),
            AuthMode::GhCli => write!(f, "gh-cli"),
        }
    }
}

/// Boxed future returned by [`CredentialProvider::acquire`]
pub type CredentialFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Credential, OrgBackupError>> + Send + 'a>>;

/// Produces the credential of one side of the backup
pub trait CredentialProvider: Send + Sync {
    /// Acquire the credential for `direction`
    fn acquire(&self, direction: Direction) -> CredentialFuture<'_>;

    /// Mode this provider implements
    fn mode(&self) -> AuthMode;
}

/// Acquire both credentials, source first
/// # Errors
/// Error if the provider can't produce either credential
pub async fn acquire_pair(
    provider: &dyn CredentialProvider,
) -> Result<(Credential, Credential), OrgBackupError> {
    info!("Authentication mode: {}", provider.mode());
    let source = provider.acquire(Direction::Source).await?;
    let destination = provider.acquire(Direction::Destination).await?;
    Ok((source, destination))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn debug_hides_secret() {
        let credential = Credential::new("ghp_abcdef123456");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.preview(), "ghp_...");
    }

    #[tokio::test]
    async fn pair_comes_from_both_directions() {
        let provider =
            TokenProvider::new(Some(Credential::new("src")), Some(Credential::new("dst")));
        assert_eq!(provider.mode(), AuthMode::Token);
        let (source, destination) = acquire_pair(&provider).await.unwrap();
        assert_eq!(source.secret(), "src");
        assert_eq!(destination.secret(), "dst");
    }
}
