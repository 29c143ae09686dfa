//! Github Platform
use super::{GITHUB_API_HEADER, GITHUB_API_VERSION, PER_PAGE};
use crate::{
    auth::Credential,
    errors::{ErrorKind, OrgBackupError},
    github::repo::RepoGithub,
    platform::{Catalog, CatalogFuture, CreateRepository},
    utils::RepositoryDescriptor,
};
use log::{debug, info, warn};
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, USER_AGENT},
    RequestBuilder, Response, StatusCode,
};
use serde::Deserialize;
use urlencoding::encode;

/// Requests left in the current rate limit window
const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

/// User agent sent with every API call
const USER_AGENT_VALUE: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Github Platform
#[derive(Debug, Clone)]
pub struct GithubPlatform {
    /// REST API base URL, without trailing slash
    api_url: String,

    /// Host serving git over HTTPS
    git_host: String,

    /// Credential used for every call
    credential: Credential,

    /// Reqwest client
    client: reqwest::Client,
}

/// Identity behind a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    /// Login of the authenticated user
    pub login: String,

    /// Scopes granted to the token, empty for fine-grained tokens
    pub scopes: Vec<String>,
}

/// Body of `GET /user`
#[derive(Deserialize)]
struct UserGithub {
    /// Login
    login: String,
}

impl GithubPlatform {
    /// Create a new GithubPlatform
    pub(crate) fn new(api_url: &str, git_host: &str, credential: Credential) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            git_host: git_host.to_string(),
            credential,
            client: reqwest::Client::new(),
        }
    }

    /// Add the headers every GitHub call needs
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.credential.secret()),
            )
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(GITHUB_API_HEADER, GITHUB_API_VERSION)
    }

    /// Fetch the authenticated user and the scopes of the credential
    /// # Errors
    /// `Auth` if the credential is rejected
    pub async fn viewer(&self) -> Result<Viewer, OrgBackupError> {
        let url = format!("{}/user", self.api_url);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = check_status(response, "Unable to fetch the authenticated user").await?;
        let scopes = response
            .headers()
            .get("X-OAuth-Scopes")
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let text = response.text().await?;
        let user: UserGithub = serde_json::from_str(&text)?;
        Ok(Viewer {
            login: user.login,
            scopes,
        })
    }
}

/// Turn an unsuccessful response into the matching error kind
async fn check_status(response: Response, context: &str) -> Result<Response, OrgBackupError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let quota_spent = response
        .headers()
        .get(RATE_LIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    let text = response.text().await.unwrap_or_default();
    let kind = match status {
        // GitHub answers 403 to both missing permissions and rate limiting
        StatusCode::FORBIDDEN if quota_spent || text.to_lowercase().contains("rate limit") => {
            ErrorKind::TransientNetwork
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Auth,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::UNPROCESSABLE_ENTITY if text.to_lowercase().contains("already exists") => {
            ErrorKind::AlreadyExists
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            ErrorKind::TransientNetwork
        }
        _ => ErrorKind::Other,
    };
    let message = format!("{context} ({status}): {text}");
    Err(OrgBackupError::new(kind).with_text(&message))
}

impl Catalog for GithubPlatform {
    fn list_repositories<'a>(
        &'a self,
        org: &'a str,
    ) -> CatalogFuture<'a, Vec<RepositoryDescriptor>> {
        Box::pin(async move {
            let url = format!("{}/orgs/{}/repos", self.api_url, encode(org));
            let mut page: usize = 1;
            let mut all_repos = vec![];
            loop {
                let request = self.client.get(&url).query(&[
                    ("type", "all".to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ]);
                let response = self.authorized(request).send().await?;
                let context = format!("Unable to list repositories of '{org}'");
                let response = check_status(response, &context).await?;
                let text = response.text().await?;
                let repos: Vec<RepoGithub> = serde_json::from_str(&text)?;
                if repos.is_empty() {
                    break;
                }
                debug!("Requested github {org} (page {page}): {}", repos.len());
                all_repos.extend(repos.into_iter().map(RepositoryDescriptor::from));
                page += 1;
            }
            info!("Found {} repositories in {org}", all_repos.len());
            Ok(all_repos)
        })
    }

    fn create_repository<'a>(
        &'a self,
        org: &'a str,
        request: &'a CreateRepository,
    ) -> CatalogFuture<'a, RepositoryDescriptor> {
        Box::pin(async move {
            let url = format!("{}/orgs/{}/repos", self.api_url, encode(org));
            let response = self
                .authorized(self.client.post(&url))
                .json(request)
                .send()
                .await?;
            let context = format!("Unable to create '{org}/{}'", request.name);
            let response = check_status(response, &context).await?;
            let text = response.text().await?;
            let repo: RepoGithub = serde_json::from_str(&text)?;
            info!("Created repository: {org}/{}", repo.name);
            Ok(repo.into())
        })
    }

    fn delete_repository<'a>(&'a self, org: &'a str, name: &'a str) -> CatalogFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/repos/{}/{}", self.api_url, encode(org), encode(name));
            let response = self.authorized(self.client.delete(&url)).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                warn!("Repository not found: {org}/{name}");
                return Ok(());
            }
            let context = format!("Unable to delete '{org}/{name}'");
            check_status(response, &context).await?;
            Ok(())
        })
    }

    fn remote_url(&self, org: &str, name: &str) -> String {
        format!("https://{}/{}/{}.git", self.git_host, org, name)
    }
}
