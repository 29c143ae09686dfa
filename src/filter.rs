//! Repository selection and destination naming
use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::{
    errors::{ErrorKind, OrgBackupError},
    utils::RepositoryDescriptor,
};

/// Which repositories to back up and how to name their copies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// When not empty, only these repositories are considered
    pub include_only: BTreeSet<String>,

    /// Repositories removed after `include_only` is applied
    pub exclude: BTreeSet<String>,

    /// Prepended to every destination name
    pub name_prefix: String,

    /// Prepend the run date as `YYYYMMDD-` ahead of `name_prefix`
    pub include_date_prefix: bool,

    /// Drop private repositories
    pub public_only: bool,
}

impl FilterConfig {
    /// Whether `repo` survives the filters
    pub fn selects(&self, repo: &RepositoryDescriptor) -> bool {
        (self.include_only.is_empty() || self.include_only.contains(&repo.name))
            && !self.exclude.contains(&repo.name)
            && !(self.public_only && repo.is_private)
    }

    /// Full prefix of destination names for a run on `date`
    pub fn effective_prefix(&self, date: NaiveDate) -> String {
        if self.include_date_prefix {
            format!("{}-{}", date.format("%Y%m%d"), self.name_prefix)
        } else {
            self.name_prefix.clone()
        }
    }

    /// Destination name of `name` for a run on `date`
    pub fn destination_name(&self, name: &str, date: NaiveDate) -> String {
        format!("{}{name}", self.effective_prefix(date))
    }
}

/// Destination name of `name`: optional `YYYYMMDD-` date, then `prefix`, then the name
pub fn destination_name(name: &str, prefix: &str, date: Option<NaiveDate>) -> String {
    match date {
        Some(date) => format!("{}-{prefix}{name}", date.format("%Y%m%d")),
        None => format!("{prefix}{name}"),
    }
}

/// Keep the repositories selected by `filter`, preserving catalog order
pub fn filter_repositories(
    repos: Vec<RepositoryDescriptor>,
    filter: &FilterConfig,
) -> Vec<RepositoryDescriptor> {
    repos.into_iter().filter(|r| filter.selects(r)).collect()
}

/// Pair each repository with its destination name, rejecting collisions.
///
/// Names are compared case-insensitively, like the hosting platform does.
/// # Errors
/// `DuplicateDestination` if two repositories map to the same name
pub fn assign_destinations(
    repos: Vec<RepositoryDescriptor>,
    filter: &FilterConfig,
    date: NaiveDate,
) -> Result<Vec<(RepositoryDescriptor, String)>, OrgBackupError> {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut collisions = vec![];
    let mut assigned = Vec::with_capacity(repos.len());
    for repo in repos {
        let destination = filter.destination_name(&repo.name, date);
        if let Some(previous) = seen.insert(destination.to_lowercase(), repo.name.clone()) {
            let name = &repo.name;
            collisions.push(format!("'{previous}' and '{name}' -> '{destination}'"));
        }
        assigned.push((repo, destination));
    }
    if !collisions.is_empty() {
        return Err(OrgBackupError::new(ErrorKind::DuplicateDestination)
            .with_text(&collisions.join("; ")));
    }
    Ok(assigned)
}
