//! Command line options for the org-backup tool
use std::{path::PathBuf, sync::Arc};

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{
        acquire_pair, AuthMode, CredentialProvider, GhCliProvider, OAuthProvider, TokenProvider,
    },
    cleanup::{cleanup, confirm_on_terminal, CleanupOptions},
    config::OrgBackupConfig,
    coordinator::{Coordinator, Summary},
    errors::{ErrorKind, OrgBackupError},
    git::LibGit,
    github::platform::GithubPlatform,
    logging::logger,
    platform::Catalog,
    report::{print_summary, Reporter},
    utils::Direction,
};

/// org-backup - Back up every repository of a GitHub organization into another one
#[derive(Parser, Default, Clone, Debug)]
#[command(version)]
pub struct OrgBackupCli {
    /// Custom configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Show the current config path
    #[arg(long)]
    pub show_config_path: bool,

    /// Verbose mode (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also append the log to this file
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do, `backup` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl OrgBackupCli {
    /// Log level asked for on the command line
    pub fn log_level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Warn,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }
}

/// Subcommands
#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Copy every selected repository of the source organization
    Backup(BackupArgs),

    /// Delete destination repositories by name prefix
    Cleanup(CleanupArgs),

    /// Check that the credentials reach both organizations
    Auth(AuthArgs),
}

/// How credentials are obtained
#[derive(Args, Default, Clone, Debug)]
pub struct CredentialArgs {
    /// Authentication mode
    #[arg(long, value_enum)]
    pub auth: Option<AuthMode>,

    /// Token of the source organization
    #[arg(long)]
    pub source_token: Option<String>,

    /// Token of the destination organization
    #[arg(long)]
    pub dest_token: Option<String>,
}

/// Options of `backup`
#[derive(Args, Default, Clone, Debug)]
pub struct BackupArgs {
    /// Organization to back up
    #[arg(short, long, visible_alias = "from")]
    pub source_org: Option<String>,

    /// Organization receiving the copies
    #[arg(short, long, visible_alias = "to")]
    pub dest_org: Option<String>,

    /// Credentials
    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Repositories to skip (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Only back up these repositories (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    pub include_only: Vec<String>,

    /// Prefix of the destination names
    #[arg(short = 'p', long = "repo-prefix")]
    pub repo_prefix: Option<String>,

    /// Prepend the date (YYYYMMDD-) to destination names
    #[arg(long)]
    pub include_date_prefix: bool,

    /// Skip private repositories
    #[arg(long)]
    pub public_only: bool,

    /// Simultaneous transfers
    #[arg(short, long, visible_alias = "concurrency")]
    pub workers: Option<usize>,

    /// Directory of the temporary clones
    #[arg(long)]
    pub clone_dir: Option<PathBuf>,

    /// Retries of a failed clone, create or push
    #[arg(long)]
    pub retries: Option<u32>,

    /// Show what would be backed up without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

/// Options of `cleanup`
#[derive(Args, Default, Clone, Debug)]
pub struct CleanupArgs {
    /// Organization holding the backups, `dest_org` when omitted
    #[arg(short, long)]
    pub org: Option<String>,

    /// Delete repositories whose name starts with this
    #[arg(short, long)]
    pub prefix: String,

    /// Credentials, the destination side is used
    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Only list what would be deleted
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Options of `auth`
#[derive(Args, Default, Clone, Debug)]
pub struct AuthArgs {
    /// Source organization to probe
    #[arg(short, long)]
    pub source_org: Option<String>,

    /// Destination organization to probe
    #[arg(short, long)]
    pub dest_org: Option<String>,

    /// Credentials
    #[command(flatten)]
    pub credentials: CredentialArgs,
}

/// How a run ended, mapped to the exit code by `main`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Everything worked
    Clean,
    /// At least one repository failed
    WithFailures,
    /// The user pressed Ctrl-C
    Interrupted,
}

impl RunStatus {
    /// Exit code of the process
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Clean => 0,
            RunStatus::WithFailures => 1,
            RunStatus::Interrupted => 130,
        }
    }
}

impl From<&Summary> for RunStatus {
    fn from(summary: &Summary) -> Self {
        if summary.interrupted {
            RunStatus::Interrupted
        } else if summary.has_failures() {
            RunStatus::WithFailures
        } else {
            RunStatus::Clean
        }
    }
}

/// Run the org-backup tool with the provided command line options
/// # Errors
/// Error if the configuration is invalid or the run can't start
pub async fn org_backup_main(args: OrgBackupCli) -> Result<RunStatus, OrgBackupError> {
    let dotenv_loaded = dotenv::dotenv().is_ok();
    let mut config = OrgBackupConfig::try_new(args)?;
    let log_file = config.log_file();
    logger(config.cli_args.log_level(), log_file.as_deref())?
        .try_init()
        .map_err(|e| {
            OrgBackupError::new_with_source(ErrorKind::Other, "Unable to set up logging", e)
        })?;
    if dotenv_loaded {
        info!("Loaded .env");
    }
    if config.cli_args.show_config_path {
        println!("{}", config.config_path.display());
        return Ok(RunStatus::Clean);
    }
    match config.cli_args.command.clone() {
        Some(Command::Backup(args)) => run_backup(&mut config, &args).await,
        None => run_backup(&mut config, &BackupArgs::default()).await,
        Some(Command::Cleanup(args)) => run_cleanup(&mut config, &args).await,
        Some(Command::Auth(args)) => run_auth_check(&mut config, &args).await,
    }
}

/// Build the credential provider of the configured mode
fn build_provider(
    config: &mut OrgBackupConfig,
    credentials: &CredentialArgs,
    directions: &[Direction],
) -> Result<Box<dyn CredentialProvider>, OrgBackupError> {
    Ok(match config.auth_mode(credentials.auth) {
        AuthMode::Token => {
            let mut resolve = |direction: Direction, flag: &Option<String>| {
                if directions.contains(&direction) {
                    config.resolve_token(direction, flag.as_deref())
                } else {
                    Ok(None)
                }
            };
            let source = resolve(Direction::Source, &credentials.source_token)?;
            let destination = resolve(Direction::Destination, &credentials.dest_token)?;
            Box::new(TokenProvider::new(source, destination))
        }
        AuthMode::Oauth => {
            let oauth = config.config_data.oauth.clone().unwrap_or_default();
            Box::new(OAuthProvider::new(&oauth, config.oauth_token_cache())?)
        }
        AuthMode::GhCli => Box::new(GhCliProvider::default()),
    })
}

/// Cancellation token tripped by Ctrl-C
fn interrupt_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning running transfers");
            trigger.cancel();
        }
    });
    cancel
}

/// `backup` subcommand
async fn run_backup(
    config: &mut OrgBackupConfig,
    args: &BackupArgs,
) -> Result<RunStatus, OrgBackupError> {
    let migration = config.migration_config(args, Local::now().date_naive())?;
    let provider = build_provider(
        config,
        &args.credentials,
        &[Direction::Source, Direction::Destination],
    )?;
    let (source_credential, destination_credential) = acquire_pair(provider.as_ref()).await?;
    let github = config.github();
    let source: Arc<dyn Catalog> = Arc::new(github.get_platform(source_credential.clone()));
    let destination: Arc<dyn Catalog> =
        Arc::new(github.get_platform(destination_credential.clone()));
    let coordinator = Coordinator::new(
        source,
        destination,
        Arc::new(LibGit),
        source_credential,
        destination_credential,
    );

    let cancel = interrupt_on_ctrl_c();
    let (events, reporter) = Reporter::start();
    let summary = coordinator.run(&migration, Some(events), cancel).await;
    if let Err(e) = reporter.await {
        warn!("Progress display failed: {e}");
    }
    let summary = summary?;
    print_summary(&summary);
    Ok(RunStatus::from(&summary))
}

/// `cleanup` subcommand
async fn run_cleanup(
    config: &mut OrgBackupConfig,
    args: &CleanupArgs,
) -> Result<RunStatus, OrgBackupError> {
    let org = args
        .org
        .clone()
        .or_else(|| config.config_data.dest_org.clone())
        .filter(|org| !org.trim().is_empty())
        .ok_or_else(|| {
            OrgBackupError::new(ErrorKind::Config)
                .with_text("Missing organization (--org or dest_org)")
        })?;
    let provider = build_provider(config, &args.credentials, &[Direction::Destination])?;
    info!("Authentication mode: {}", provider.mode());
    let credential = provider.acquire(Direction::Destination).await?;
    let catalog = config.github().get_platform(credential);
    let options = CleanupOptions {
        org,
        prefix: args.prefix.clone(),
        dry_run: args.dry_run,
        yes: args.yes,
    };
    let summary = cleanup(&catalog, &options, confirm_on_terminal).await?;
    println!("{summary}");
    Ok(if summary.failed > 0 {
        RunStatus::WithFailures
    } else {
        RunStatus::Clean
    })
}

/// Report who `catalog` is logged in as and what it sees of `org`
async fn check_side(
    catalog: &GithubPlatform,
    direction: Direction,
    org: Option<&str>,
) -> Result<(), OrgBackupError> {
    let viewer = catalog.viewer().await?;
    let scopes = if viewer.scopes.is_empty() {
        "none reported".to_string()
    } else {
        viewer.scopes.join(", ")
    };
    println!(
        "{direction}: authenticated as {} (scopes: {scopes})",
        viewer.login
    );
    if let Some(org) = org {
        let repos = catalog.list_repositories(org).await?;
        let private = repos.iter().filter(|r| r.is_private).count();
        println!(
            "{direction}: {org} has {} repositories ({} public, {private} private)",
            repos.len(),
            repos.len() - private
        );
    }
    Ok(())
}

/// `auth` subcommand
async fn run_auth_check(
    config: &mut OrgBackupConfig,
    args: &AuthArgs,
) -> Result<RunStatus, OrgBackupError> {
    let provider = build_provider(
        config,
        &args.credentials,
        &[Direction::Source, Direction::Destination],
    )?;
    let (source_credential, destination_credential) = acquire_pair(provider.as_ref()).await?;
    let github = config.github();
    let source_org = args
        .source_org
        .clone()
        .or_else(|| config.config_data.source_org.clone());
    let dest_org = args
        .dest_org
        .clone()
        .or_else(|| config.config_data.dest_org.clone());
    let sides = [
        (Direction::Source, source_credential, source_org),
        (Direction::Destination, destination_credential, dest_org),
    ];
    let mut status = RunStatus::Clean;
    for (direction, credential, org) in sides {
        info!("Checking {direction} credential {}", credential.preview());
        let catalog = github.get_platform(credential);
        if let Err(e) = check_side(&catalog, direction, org.as_deref()).await {
            error!("{direction}: {e}");
            status = RunStatus::WithFailures;
        }
    }
    Ok(status)
}
