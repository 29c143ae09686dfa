//! Personal access token provider
use serde::{Deserialize, Serialize};

use super::{AuthMode, Credential, CredentialFuture, CredentialProvider};
use crate::{
    config::token_var,
    errors::{ErrorKind, OrgBackupError},
    utils::Direction,
};

/// Token configuration, the `[tokens]` section of the config file
#[derive(Deserialize, Serialize, Default, Clone)]
pub struct TokenConfig {
    /// Token of the source organization
    pub source: Option<String>,

    /// Token of the destination organization
    pub destination: Option<String>,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = |token: &Option<String>| token.as_ref().map(|_| "***");
        f.debug_struct("TokenConfig")
            .field("source", &shown(&self.source))
            .field("destination", &shown(&self.destination))
            .finish()
    }
}

/// Tokens resolved from flags, environment, config file or prompt
#[derive(Debug, Clone, Default)]
pub struct TokenProvider {
    /// Token of the source organization
    source: Option<Credential>,

    /// Token of the destination organization
    destination: Option<Credential>,
}

impl TokenProvider {
    /// Create a provider from already resolved tokens
    pub fn new(source: Option<Credential>, destination: Option<Credential>) -> Self {
        Self {
            source,
            destination,
        }
    }
}

impl CredentialProvider for TokenProvider {
    fn acquire(&self, direction: Direction) -> CredentialFuture<'_> {
        let credential = match direction {
            Direction::Source => self.source.clone(),
            Direction::Destination => self.destination.clone(),
        };
        Box::pin(async move {
            credential.ok_or_else(|| {
                OrgBackupError::new(ErrorKind::Config).with_text(&format!(
                    "No {direction} token: use --{}-token, the {} variable or the config file",
                    match direction {
                        Direction::Source => "source",
                        Direction::Destination => "dest",
                    },
                    token_var(direction)
                ))
            })
        })
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Token
    }
}
