//! Repository catalog of a hosting platform
use std::{future::Future, pin::Pin};

use serde::Serialize;

use crate::{errors::OrgBackupError, utils::RepositoryDescriptor};

/// Boxed future returned by catalog operations
pub type CatalogFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, OrgBackupError>> + Send + 'a>>;

/// Payload used to create a repository
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CreateRepository {
    /// Repository name
    pub name: String,

    /// Repository description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the repository is private
    pub private: bool,

    /// Never initialise with a README, the mirror brings its own history
    pub auto_init: bool,
}

impl CreateRepository {
    /// Build a creation request mirroring the visibility and description of `source`
    pub fn mirroring(name: &str, source: &RepositoryDescriptor) -> Self {
        Self {
            name: name.to_string(),
            description: source.description.clone(),
            private: source.is_private,
            auto_init: false,
        }
    }
}

/// Lists, creates and deletes repositories of an organization.
///
/// Implementations hold the credential they authenticate with.
pub trait Catalog: Sync + Send {
    /// List every repository of `org`
    fn list_repositories<'a>(
        &'a self,
        org: &'a str,
    ) -> CatalogFuture<'a, Vec<RepositoryDescriptor>>;

    /// Create a repository in `org`; fails with `AlreadyExists` if the name is taken
    fn create_repository<'a>(
        &'a self,
        org: &'a str,
        request: &'a CreateRepository,
    ) -> CatalogFuture<'a, RepositoryDescriptor>;

    /// Delete a repository of `org`; a missing repository counts as deleted
    fn delete_repository<'a>(&'a self, org: &'a str, name: &'a str) -> CatalogFuture<'a, ()>;

    /// URL the version control tool uses to reach `org/name`
    fn remote_url(&self, org: &str, name: &str) -> String;
}
