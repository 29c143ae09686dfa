//! Github Repo struct and conversion to RepositoryDescriptor struct
use crate::utils::RepositoryDescriptor;
use serde::{Deserialize, Serialize};

/// Github Repo
#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub struct RepoGithub {
    /// Repository name
    pub name: String,

    /// Repository description
    pub description: Option<String>,

    /// Repository private status
    pub private: bool,

    /// Default branch, absent on some empty repositories
    #[serde(default)]
    pub default_branch: Option<String>,

    /// Repository size in kilobytes
    #[serde(default)]
    pub size: Option<u64>,
}

impl From<RepoGithub> for RepositoryDescriptor {
    fn from(repo: RepoGithub) -> Self {
        RepositoryDescriptor {
            name: repo.name,
            is_private: repo.private,
            default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
            description: repo.description.filter(|d| !d.is_empty()),
            size_hint: repo.size.map(|kb| kb.saturating_mul(1024)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn converts_api_payload() {
        let payload = r#"{
            "id": 7,
            "name": "web-frontend",
            "description": "",
            "private": true,
            "default_branch": "develop",
            "size": 2,
            "fork": false,
            "html_url": "https://github.com/acme/web-frontend"
        }"#;
        let repo: RepoGithub = serde_json::from_str(payload).unwrap();
        let descriptor: RepositoryDescriptor = repo.into();
        assert_eq!(descriptor.name, "web-frontend");
        assert!(descriptor.is_private);
        assert_eq!(descriptor.default_branch, "develop");
        assert_eq!(descriptor.description, None);
        assert_eq!(descriptor.size_hint, Some(2048));
    }
}
