//! Mirror clone and push through libgit2
use std::path::Path;

use git2::{
    Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks,
    Repository,
};
use log::{debug, info};

use crate::{
    auth::Credential,
    errors::{ErrorKind, OrgBackupError},
};

/// Namespace of the refs GitHub keeps for pull requests
pub const PULL_REQUEST_REF_PREFIX: &str = "refs/pull/";

/// Refs sent per push call
pub const PUSH_BATCH_SIZE: usize = 50;

/// Refspec copying every ref under its own name
const MIRROR_REFSPEC: &str = "+refs/*:refs/*";

/// User name paired with a token for HTTPS git
const TOKEN_USERNAME: &str = "x-access-token";

/// Local version control operations needed by a transfer.
///
/// Calls block; the worker runs them on the blocking thread pool.
pub trait VersionControl: Send + Sync {
    /// Clone every ref and the full history of `url` into the bare repository `dest`
    /// # Errors
    /// Error if the clone fails
    fn mirror_clone(
        &self,
        url: &str,
        credential: &Credential,
        dest: &Path,
    ) -> Result<(), OrgBackupError>;

    /// Push every ref of `repo_dir` to `url`, except those starting with one of
    /// `excluded_prefixes`. Returns the warnings reported by the remote.
    /// # Errors
    /// Error if the push fails or the remote rejects a ref that was not excluded
    fn push_all(
        &self,
        repo_dir: &Path,
        url: &str,
        credential: &Credential,
        excluded_prefixes: &[String],
    ) -> Result<Vec<String>, OrgBackupError>;
}

/// [`VersionControl`] backed by libgit2
#[derive(Debug, Default, Clone)]
pub struct LibGit;

/// Credentials callback answering once with the token, then giving up
fn credentials_callback(
    credential: &Credential,
) -> impl FnMut(&str, Option<&str>, CredentialType) -> Result<Cred, git2::Error> + '_ {
    let mut asked = false;
    move |_url, _username_from_url, allowed| {
        if asked {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Http,
                "authentication failed: credential rejected",
            ));
        }
        asked = true;
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            Cred::userpass_plaintext(TOKEN_USERNAME, credential.secret())
        } else {
            Cred::default()
        }
    }
}

/// Names of every direct ref of `repo`
fn list_refs(repo: &Repository) -> Result<Vec<String>, OrgBackupError> {
    let mut names = vec![];
    for reference in repo.references()? {
        let reference = reference?;
        if reference.kind() != Some(git2::ReferenceType::Direct) {
            continue;
        }
        if let Some(name) = reference.name() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Whether `name` falls under one of `prefixes`
pub(crate) fn is_excluded(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

/// Error of a ref the remote refused; pull request refs are `UnwritableRef`
fn rejection(name: &str, message: &str, excluded_prefixes: &[String]) -> OrgBackupError {
    let unwritable =
        is_excluded(name, excluded_prefixes) || name.starts_with(PULL_REQUEST_REF_PREFIX);
    let kind = if unwritable {
        ErrorKind::UnwritableRef
    } else {
        ErrorKind::PushRejected
    };
    OrgBackupError::new(kind).with_text(&format!("{name}: {message}"))
}

/// Warning lines of remote side-band output
pub(crate) fn extract_warnings(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().trim_start_matches("remote:").trim())
        .filter(|line| line.to_lowercase().contains("warning"))
        .map(String::from)
        .collect()
}

impl VersionControl for LibGit {
    fn mirror_clone(
        &self,
        url: &str,
        credential: &Credential,
        dest: &Path,
    ) -> Result<(), OrgBackupError> {
        let repo = Repository::init_bare(dest)?;
        let mut remote = repo.remote_with_fetch("origin", url, MIRROR_REFSPEC)?;
        repo.config()?.set_bool("remote.origin.mirror", true)?;

        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(credentials_callback(credential));
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        debug!("Fetching every ref of {url} into {}", dest.display());
        remote.fetch(&[MIRROR_REFSPEC], Some(&mut fetch_opts), None)?;

        // HEAD of an empty mirror stays unborn
        if let Ok(branch) = remote.default_branch() {
            if let Some(branch) = branch.as_str() {
                repo.set_head(branch)?;
            }
        }
        Ok(())
    }

    fn push_all(
        &self,
        repo_dir: &Path,
        url: &str,
        credential: &Credential,
        excluded_prefixes: &[String],
    ) -> Result<Vec<String>, OrgBackupError> {
        let repo = Repository::open_bare(repo_dir)?;
        let (skipped, pushable): (Vec<String>, Vec<String>) = list_refs(&repo)?
            .into_iter()
            .partition(|name| is_excluded(name, excluded_prefixes));
        if !skipped.is_empty() {
            debug!("Not pushing {} unwritable refs", skipped.len());
        }
        if pushable.is_empty() {
            info!("No refs to push from {}", repo_dir.display());
            return Ok(vec![]);
        }

        let mut remote = repo.remote_anonymous(url)?;
        let mut output = String::new();
        let mut rejected: Vec<(String, String)> = vec![];
        for batch in pushable.chunks(PUSH_BATCH_SIZE) {
            let refspecs: Vec<String> = batch.iter().map(|r| format!("+{r}:{r}")).collect();
            let mut callbacks = RemoteCallbacks::new();
            callbacks.credentials(credentials_callback(credential));
            callbacks.sideband_progress(|data| {
                output.push_str(&String::from_utf8_lossy(data));
                true
            });
            callbacks.push_update_reference(|name, status| {
                if let Some(message) = status {
                    rejected.push((name.to_string(), message.to_string()));
                }
                Ok(())
            });
            let mut opts = PushOptions::new();
            opts.remote_callbacks(callbacks);
            debug!("Pushing {} refs to {url}", refspecs.len());
            remote.push(&refspecs, Some(&mut opts))?;
        }

        let mut fatal = vec![];
        for (name, message) in rejected {
            let err = rejection(&name, &message, excluded_prefixes);
            match err.kind() {
                ErrorKind::UnwritableRef => debug!("Ignoring {err}"),
                _ => fatal.push(format!("{name} ({message})")),
            }
        }
        if !fatal.is_empty() {
            return Err(OrgBackupError::new(ErrorKind::PushRejected)
                .with_text(&format!("remote rejected {}", fatal.join(", "))));
        }
        Ok(extract_warnings(&output))
    }
}
