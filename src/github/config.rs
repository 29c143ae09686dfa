//! Github configuration
use super::{platform::GithubPlatform, GITHUB_API_URL, GITHUB_URL};
use serde::{Deserialize, Serialize};

use crate::auth::Credential;

/// Github configuration, the `[github]` section of the config file
#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub struct GithubConfig {
    /// Base URL of the REST API (GitHub Enterprise uses `https://host/api/v3`)
    pub api_url: Option<String>,

    /// Host serving git over HTTPS
    pub git_host: Option<String>,
}

impl GithubConfig {
    /// REST API base URL
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(GITHUB_API_URL)
    }

    /// Git host
    pub fn git_host(&self) -> &str {
        self.git_host.as_deref().unwrap_or(GITHUB_URL)
    }

    /// Get the github platform authenticated with `credential`
    pub fn get_platform(&self, credential: Credential) -> GithubPlatform {
        GithubPlatform::new(self.api_url(), self.git_host(), credential)
    }
}
