//! # org-backup
//!
//! Back up every repository of a GitHub organization into another organization
//!
//! ## Usage
//!
//! ```txt
//! Usage: org-backup [OPTIONS] [COMMAND]
//!
//! Commands:
//!   backup   Copy every selected repository of the source organization
//!   cleanup  Delete destination repositories by name prefix
//!   auth     Check that the credentials reach both organizations
//!
//! Options:
//!   -c, --config <CONFIG>  Custom configuration file path
//!       --show-config-path Show the current config path
//!   -v, --verbose...       Verbose mode (-v, -vv)
//!       --log-file <FILE>  Also append the log to this file
//!   -q, --quiet            Only show warnings and errors
//!   -h, --help             Print help
//!   -V, --version          Print version
//! ```
//!
//! Each repository is mirror cloned, created in the destination organization
//! and pushed with every branch and tag. Pull request refs stay behind.

#![warn(clippy::all, rust_2018_idioms)]
#![deny(
    missing_docs,
    clippy::all,
    clippy::missing_docs_in_private_items,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![warn(clippy::multiple_crate_versions)]

pub(crate) mod auth;
pub(crate) mod cleanup;
pub(crate) mod cli;
pub(crate) mod config;
pub(crate) mod coordinator;
pub(crate) mod errors;
pub(crate) mod filter;
pub(crate) mod git;
pub(crate) mod logging;
pub(crate) mod macros;
pub(crate) mod platform;
pub(crate) mod report;
pub(crate) mod utils;
pub(crate) mod worker;
pub(crate) use macros::config_secret;

mod github;

#[cfg(test)]
mod testing;

pub use auth::{
    AuthMode, Credential, CredentialProvider, GhCliProvider, OAuthConfig, OAuthProvider,
    TokenConfig, TokenProvider,
};
pub use cleanup::{cleanup, CleanupOptions, CleanupSummary};
pub use cli::{org_backup_main, OrgBackupCli, RunStatus};
pub use config::{ConfigData, OrgBackupConfig};
pub use coordinator::{Coordinator, MigrationConfig, Summary};
pub use errors::{ErrorKind, OrgBackupError};
pub use filter::{assign_destinations, destination_name, filter_repositories, FilterConfig};
pub use git::{LibGit, VersionControl};
pub use github::{config::GithubConfig, platform::GithubPlatform};
pub use platform::{Catalog, CreateRepository};
pub use report::{print_summary, render_summary, Reporter};
pub use utils::{Direction, RepositoryDescriptor};
pub use worker::{
    MigrationTask, Outcome, ProgressEvent, RetryPolicy, TaskError, TaskState, TransferResult,
};
