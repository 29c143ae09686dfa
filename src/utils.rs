//! Utility functions
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, OrgBackupError};

/// Repository information, as listed by a catalog
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Hash, Clone)]
pub struct RepositoryDescriptor {
    /// Name of the repository, unique within its organization
    pub name: String,

    /// Whether the repository is private
    pub is_private: bool,

    /// Default branch of the repository
    pub default_branch: String,

    /// Description of the repository
    pub description: Option<String>,

    /// Approximate size in bytes
    pub size_hint: Option<u64>,
}

impl RepositoryDescriptor {
    /// Visibility as a word, for logs and plans
    pub fn visibility(&self) -> &'static str {
        if self.is_private {
            "private"
        } else {
            "public"
        }
    }
}

/// Which side of the backup a credential or catalog belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Source organization
    Source,
    /// Destination organization
    Destination,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Source => write!(f, "source"),
            Direction::Destination => write!(f, "destination"),
        }
    }
}

/// Get input from the user
pub(crate) fn input() -> Result<String, OrgBackupError> {
    use std::io::{stdin, stdout, Write};
    let mut s = String::new();
    let _ = stdout().flush();
    stdin().read_line(&mut s).map_err(|e| {
        OrgBackupError::new_with_source(ErrorKind::Io, "Did not enter a correct string", e)
    })?;
    if let Some('\n') = s.chars().next_back() {
        s.pop();
    }
    if let Some('\r') = s.chars().next_back() {
        s.pop();
    }
    Ok(s)
}

/// Get password from the user
pub(crate) fn get_password() -> Result<String, OrgBackupError> {
    rpassword::read_password()
        .map_err(|e| OrgBackupError::new_with_source(ErrorKind::Io, "Error reading password", e))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compare_repo() {
        let repo1 = RepositoryDescriptor {
            name: "test".to_string(),
            is_private: false,
            default_branch: "main".to_string(),
            description: Some("test".to_string()),
            size_hint: None,
        };
        let repo2 = repo1.clone();
        let repo3 = RepositoryDescriptor {
            is_private: true,
            ..repo1.clone()
        };
        assert_eq!(repo1, repo2);
        assert_ne!(repo1, repo3);
        assert_eq!(repo3.visibility(), "private");
    }
}
