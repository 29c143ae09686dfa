//! Backup of a whole organization
use std::{
    collections::VecDeque,
    fs::{create_dir_all, read_dir, remove_dir},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::NaiveDate;
use log::{debug, error, info, warn};
use tokio::{sync::Mutex, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::Credential,
    errors::{ErrorKind, OrgBackupError},
    filter::{assign_destinations, filter_repositories, FilterConfig},
    git::VersionControl,
    platform::Catalog,
    worker::{
        MigrationTask, Outcome, ProgressSender, RetryPolicy, TransferResult, Worker, WorkerSetup,
    },
};

/// Default number of simultaneous transfers
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default root of the scratch clones
pub const DEFAULT_CLONE_DIR: &str = "./temp_clones";

/// Validated settings of one backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Organization copied from
    pub source_org: String,

    /// Organization copied to
    pub dest_org: String,

    /// Selection and naming
    pub filter: FilterConfig,

    /// Simultaneous transfers
    pub concurrency: NonZeroUsize,

    /// Plan only, change nothing
    pub dry_run: bool,

    /// Root of the scratch clones
    pub clone_dir: PathBuf,

    /// Retries of the clone, create and push steps
    pub retry: RetryPolicy,

    /// Day used by the date prefix
    pub run_date: NaiveDate,
}

impl MigrationConfig {
    /// Settings with every option at its default
    pub fn new<S: Into<String>>(source_org: S, dest_org: S, run_date: NaiveDate) -> Self {
        Self {
            source_org: source_org.into(),
            dest_org: dest_org.into(),
            filter: FilterConfig::default(),
            concurrency: NonZeroUsize::new(DEFAULT_CONCURRENCY).unwrap_or(NonZeroUsize::MIN),
            dry_run: false,
            clone_dir: PathBuf::from(DEFAULT_CLONE_DIR),
            retry: RetryPolicy::default(),
            run_date,
        }
    }
}

/// Aggregate result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Every result, sorted by destination name
    pub results: Vec<TransferResult>,
    /// Tasks transferred
    pub succeeded: usize,
    /// Tasks failed
    pub failed: usize,
    /// Tasks not attempted
    pub skipped: usize,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Whether the user interrupted the run
    pub interrupted: bool,
}

impl Summary {
    /// Build a summary from unordered results
    pub fn from_results(
        mut results: Vec<TransferResult>,
        dry_run: bool,
        interrupted: bool,
    ) -> Self {
        results.sort_by(|a, b| a.destination_name.cmp(&b.destination_name));
        let count = |outcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            succeeded: count(Outcome::Succeeded),
            failed: count(Outcome::Failed),
            skipped: count(Outcome::Skipped),
            results,
            dry_run,
            interrupted,
        }
    }

    /// Number of tasks
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Share of attempted tasks that succeeded, `None` if nothing was attempted
    pub fn success_rate(&self) -> Option<f64> {
        let attempted = self.succeeded + self.failed;
        (attempted > 0).then(|| self.succeeded as f64 / attempted as f64)
    }

    /// Failed results, by destination name
    pub fn failures(&self) -> Vec<&TransferResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
            .collect()
    }

    /// Whether any task failed
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Runs backups between two catalogs
pub struct Coordinator {
    /// Catalog of the source organization
    source: Arc<dyn Catalog>,
    /// Catalog of the destination organization
    destination: Arc<dyn Catalog>,
    /// Version control backend
    vcs: Arc<dyn VersionControl>,
    /// Credential of the source organization
    source_credential: Credential,
    /// Credential of the destination organization
    destination_credential: Credential,
}

impl Coordinator {
    /// Create a coordinator
    pub fn new(
        source: Arc<dyn Catalog>,
        destination: Arc<dyn Catalog>,
        vcs: Arc<dyn VersionControl>,
        source_credential: Credential,
        destination_credential: Credential,
    ) -> Self {
        Self {
            source,
            destination,
            vcs,
            source_credential,
            destination_credential,
        }
    }

    /// Back up every selected repository of `config.source_org`.
    ///
    /// Failed transfers are reported in the summary, they never abort the run.
    /// # Errors
    /// Error if the source can't be listed, if two repositories map to the
    /// same destination name, or if the clone directory can't be created
    pub async fn run(
        &self,
        config: &MigrationConfig,
        events: Option<ProgressSender>,
        cancel: CancellationToken,
    ) -> Result<Summary, OrgBackupError> {
        info!("Listing repositories of {}", config.source_org);
        let repos = self
            .source
            .list_repositories(&config.source_org)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::Auth {
                    error!(
                        "Cannot list {}, check the source credential",
                        config.source_org
                    );
                }
                e
            })?;
        let found = repos.len();
        let selected = filter_repositories(repos, &config.filter);
        info!("{} of {found} repositories selected", selected.len());
        let tasks: Vec<MigrationTask> =
            assign_destinations(selected, &config.filter, config.run_date)?
                .into_iter()
                .map(|(repo, destination)| MigrationTask::new(repo, destination))
                .collect();

        let worker = Arc::new(Worker::new(
            WorkerSetup {
                source_org: config.source_org.clone(),
                dest_org: config.dest_org.clone(),
                source: Arc::clone(&self.source),
                destination: Arc::clone(&self.destination),
                vcs: Arc::clone(&self.vcs),
                source_credential: self.source_credential.clone(),
                destination_credential: self.destination_credential.clone(),
                clone_dir: config.clone_dir.clone(),
                retry: config.retry,
            },
            events,
            cancel.clone(),
        ));

        if config.dry_run {
            let results = tasks
                .into_iter()
                .map(|task| {
                    let plan = format!(
                        "{} -> {} ({})",
                        task.source_name,
                        task.destination_name,
                        task.source.visibility()
                    );
                    worker.skip(task, Some(plan))
                })
                .collect();
            return Ok(Summary::from_results(results, true, false));
        }
        if tasks.is_empty() {
            return Ok(Summary::from_results(vec![], false, false));
        }

        create_dir_all(&config.clone_dir).map_err(|e| {
            OrgBackupError::new_with_source(
                ErrorKind::Io,
                &format!("Unable to create {}", config.clone_dir.display()),
                e,
            )
        })?;
        let executors = config.concurrency.get().min(tasks.len());
        info!(
            "Backing up {} repositories to {} with {executors} workers",
            tasks.len(),
            config.dest_org
        );
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let mut set = JoinSet::new();
        for id in 0..executors {
            let worker = Arc::clone(&worker);
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            set.spawn(async move {
                let mut results = vec![];
                loop {
                    let Some(task) = queue.lock().await.pop_front() else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        debug!("worker {id}: skipping {}", task.source_name);
                        results.push(worker.skip(task, None));
                        continue;
                    }
                    debug!("worker {id}: picked {}", task.source_name);
                    results.push(worker.run(task).await);
                }
                results
            });
        }

        let mut results = vec![];
        while let Some(joined) = set.join_next().await {
            let batch = joined.map_err(|e| {
                OrgBackupError::new_with_source(ErrorKind::Other, "worker task failed", e)
            })?;
            results.extend(batch);
        }
        remove_if_empty(&config.clone_dir);
        Ok(Summary::from_results(results, false, cancel.is_cancelled()))
    }
}

/// Remove `dir` if nothing is left in it
fn remove_if_empty(dir: &Path) {
    let empty = match read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    };
    if empty {
        match remove_dir(dir) {
            Ok(()) => debug!("Removed {}", dir.display()),
            Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
        }
    }
}
