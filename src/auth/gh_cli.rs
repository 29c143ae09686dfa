//! Credential delegated to the GitHub CLI
use std::process::Stdio;

use log::{debug, info};
use tokio::process::Command;

use super::{AuthMode, Credential, CredentialFuture, CredentialProvider};
use crate::{
    errors::{ErrorKind, OrgBackupError},
    utils::Direction,
};

/// Hint shown when `gh` has no usable login
const LOGIN_HINT: &str = "run: gh auth login --scopes 'repo,read:org'";

/// Reads the token of the account logged in with `gh`.
///
/// Both organizations are reached with that single token.
#[derive(Debug, Clone)]
pub struct GhCliProvider {
    /// Name or path of the `gh` binary
    program: String,
}

impl Default for GhCliProvider {
    fn default() -> Self {
        Self {
            program: "gh".to_string(),
        }
    }
}

impl GhCliProvider {
    /// Use another `gh` binary
    pub fn with_program<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `gh` with `args` and return stdout and stderr
    async fn run(&self, args: &[&str]) -> Result<(bool, String, String), OrgBackupError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                OrgBackupError::new_with_source(
                    ErrorKind::Config,
                    "GitHub CLI (gh) is not installed, see https://cli.github.com/",
                    e,
                )
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Ok((output.status.success(), stdout, stderr))
    }

    /// Account currently logged in, if any
    /// # Errors
    /// Error if `gh` can't be run
    pub async fn logged_in_account(&self) -> Result<Option<String>, OrgBackupError> {
        let (ok, stdout, stderr) = self.run(&["auth", "status"]).await?;
        if !ok {
            return Ok(None);
        }
        // older releases print the status on stderr
        let account = parse_status_account(&stderr);
        Ok(account.or_else(|| parse_status_account(&stdout)))
    }

    /// Token of the logged in account
    async fn token(&self) -> Result<Credential, OrgBackupError> {
        let (ok, stdout, stderr) = self.run(&["auth", "token"]).await?;
        if !ok {
            return Err(OrgBackupError::new(ErrorKind::Auth).with_text(&format!(
                "Not authenticated with GitHub CLI ({LOGIN_HINT}): {}",
                stderr.trim()
            )));
        }
        let token = stdout.trim();
        if token.is_empty() {
            return Err(OrgBackupError::new(ErrorKind::Auth)
                .with_text(&format!("No token returned from GitHub CLI ({LOGIN_HINT})")));
        }
        Ok(Credential::new(token))
    }
}

impl CredentialProvider for GhCliProvider {
    fn acquire(&self, direction: Direction) -> CredentialFuture<'_> {
        Box::pin(async move {
            let credential = self.token().await?;
            match self.logged_in_account().await {
                Ok(Some(account)) => info!("Using GitHub CLI token of {account} for {direction}"),
                Ok(None) => info!("Using GitHub CLI token for {direction}"),
                Err(e) => debug!("gh auth status failed: {e}"),
            }
            Ok(credential)
        })
    }

    fn mode(&self) -> AuthMode {
        AuthMode::GhCli
    }
}

/// Extract the account name from `gh auth status` output
fn parse_status_account(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let rest = line.split_once("Logged in to ").map(|(_, rest)| rest)?;
        let after = rest
            .split_once(" account ")
            .or_else(|| rest.split_once(" as "))
            .map(|(_, after)| after)?;
        after.split_whitespace().next().map(String::from)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_current_status_format() {
        let output = concat!(
            "github.com\n",
            "  ✓ Logged in to github.com account octocat (keyring)\n",
            "  - Active account: true\n",
        );
        assert_eq!(parse_status_account(output), Some("octocat".to_string()));
    }

    #[test]
    fn parses_legacy_status_format() {
        let output = "github.com\n  ✓ Logged in to github.com as hubot (oauth_token)\n";
        assert_eq!(parse_status_account(output), Some("hubot".to_string()));
    }

    #[test]
    fn no_login_line() {
        assert_eq!(
            parse_status_account("You are not logged into any GitHub hosts."),
            None
        );
    }

    #[tokio::test]
    async fn missing_binary_is_config_error() {
        let provider = GhCliProvider::with_program("gh-binary-that-does-not-exist");
        let err = provider.acquire(Direction::Source).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
