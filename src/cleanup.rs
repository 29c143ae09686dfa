//! Deletion of backup repositories by name prefix
use std::fmt;

use log::{info, warn};

use crate::{
    errors::{ErrorKind, OrgBackupError},
    platform::Catalog,
    utils::input,
};

/// Word the user has to type before anything is deleted
pub const CONFIRMATION_WORD: &str = "DELETE";

/// Names listed before the rest is elided
const SHOWN_NAMES: usize = 10;

/// What to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Organization holding the backups
    pub org: String,
    /// Only repositories whose name starts with this are touched
    pub prefix: String,
    /// List only
    pub dry_run: bool,
    /// Skip the confirmation
    pub yes: bool,
}

/// Result of a cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Repositories matching the prefix
    pub total: usize,
    /// Repositories deleted
    pub deleted: usize,
    /// Repositories that could not be deleted
    pub failed: usize,
    /// Whether the user declined the deletion
    pub cancelled: bool,
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cleanup summary")?;
        writeln!(f, "  Matching: {}", self.total)?;
        writeln!(f, "  Deleted:  {}", self.deleted)?;
        write!(f, "  Failed:   {}", self.failed)?;
        if self.cancelled {
            write!(f, "\n  Cancelled by the user")?;
        }
        Ok(())
    }
}

/// Ask the user to type [`CONFIRMATION_WORD`]
/// # Errors
/// Error if stdin can't be read
pub fn confirm_on_terminal(names: &[String]) -> Result<bool, OrgBackupError> {
    println!(
        "This will permanently delete {} repositories. Type {CONFIRMATION_WORD} to confirm:",
        names.len()
    );
    Ok(input()?.trim() == CONFIRMATION_WORD)
}

/// Names shown to the user before deleting
fn preview(names: &[String]) -> Vec<String> {
    let mut lines: Vec<String> = names
        .iter()
        .take(SHOWN_NAMES)
        .map(|name| format!("  - {name}"))
        .collect();
    if names.len() > SHOWN_NAMES {
        lines.push(format!("  ... and {} more", names.len() - SHOWN_NAMES));
    }
    lines
}

/// Delete every repository of `options.org` whose name starts with
/// `options.prefix`, once `confirm` agrees.
/// # Errors
/// `Config` for an empty prefix, or the listing error
pub async fn cleanup<F>(
    catalog: &dyn Catalog,
    options: &CleanupOptions,
    confirm: F,
) -> Result<CleanupSummary, OrgBackupError>
where
    F: FnOnce(&[String]) -> Result<bool, OrgBackupError>,
{
    if options.prefix.trim().is_empty() {
        return Err(OrgBackupError::new(ErrorKind::Config)
            .with_text("A non empty --prefix is required, refusing to delete every repository"));
    }
    let mut names: Vec<String> = catalog
        .list_repositories(&options.org)
        .await?
        .into_iter()
        .map(|r| r.name)
        .filter(|name| name.starts_with(&options.prefix))
        .collect();
    names.sort();
    let mut summary = CleanupSummary {
        total: names.len(),
        ..Default::default()
    };
    if names.is_empty() {
        info!(
            "No repositories of {} start with '{}'",
            options.org, options.prefix
        );
        return Ok(summary);
    }

    println!(
        "{} repositories of {} start with '{}':",
        names.len(),
        options.org,
        options.prefix
    );
    for line in preview(&names) {
        println!("{line}");
    }
    if options.dry_run {
        info!("Dry run, nothing deleted");
        return Ok(summary);
    }
    if !options.yes && !confirm(&names)? {
        info!("Cleanup cancelled");
        summary.cancelled = true;
        return Ok(summary);
    }

    for name in &names {
        match catalog.delete_repository(&options.org, name).await {
            Ok(()) => {
                info!("Deleted {}/{name}", options.org);
                summary.deleted += 1;
            }
            Err(e) => {
                warn!("Failed to delete {}/{name}: {e}", options.org);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
