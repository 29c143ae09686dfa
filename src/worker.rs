//! Transfer of one repository: clone, create, push
use std::{
    fmt,
    fs::{create_dir_all, remove_dir_all},
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::Credential,
    errors::{ErrorKind, OrgBackupError},
    git::{VersionControl, PULL_REQUEST_REF_PREFIX},
    platform::{Catalog, CreateRepository},
    utils::RepositoryDescriptor,
};

/// State of a task in the transfer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not started
    Pending,
    /// Mirror cloning the source
    Cloning,
    /// Creating the destination repository
    Creating,
    /// Pushing the mirror to the destination
    Pushing,
    /// Every ref pushed
    Succeeded,
    /// A step failed for good
    Failed,
    /// Never started (dry run or interrupted)
    Skipped,
}

impl TaskState {
    /// Whether no transition leaves this state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Skipped
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Cloning => "cloning",
            TaskState::Creating => "creating",
            TaskState::Pushing => "pushing",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Final classification of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Transferred
    Succeeded,
    /// Failed at some step
    Failed,
    /// Not attempted
    Skipped,
}

/// Why a task failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    /// Step that failed
    pub step: TaskState,
    /// Kind of the underlying error
    pub kind: ErrorKind,
    /// Error message, verbatim
    pub message: String,
    /// Attempts made by the failing step
    pub attempts: u32,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.step, self.attempts, self.message
        )
    }
}

/// One repository to transfer
#[derive(Debug, Clone)]
pub struct MigrationTask {
    /// Snapshot of the source repository
    pub source: RepositoryDescriptor,
    /// Name of the repository in the source organization
    pub source_name: String,
    /// Name of the copy in the destination organization
    pub destination_name: String,
    /// Current state
    pub status: TaskState,
    /// Largest number of attempts any step needed so far
    pub attempts: u32,
    /// Last error seen
    pub last_error: Option<TaskError>,
}

impl MigrationTask {
    /// Create a pending task
    pub fn new(source: RepositoryDescriptor, destination_name: String) -> Self {
        Self {
            source_name: source.name.clone(),
            source,
            destination_name,
            status: TaskState::Pending,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Terminal snapshot of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// Name in the source organization
    pub source_name: String,
    /// Name in the destination organization
    pub destination_name: String,
    /// Outcome
    pub outcome: Outcome,
    /// Failure detail, for failed tasks
    pub error: Option<TaskError>,
    /// What would have happened, for dry runs
    pub planned_action: Option<String>,
    /// Attempts of the busiest step
    pub attempts: u32,
    /// Wall clock time spent on the task
    pub duration_ms: u64,
}

impl TransferResult {
    /// Result of a task that never ran
    pub fn skipped(task: &MigrationTask, planned_action: Option<String>) -> Self {
        Self {
            source_name: task.source_name.clone(),
            destination_name: task.destination_name.clone(),
            outcome: Outcome::Skipped,
            error: None,
            planned_action,
            attempts: 0,
            duration_ms: 0,
        }
    }
}

/// A task entered a new state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Source name of the task
    pub task_name: String,
    /// State entered
    pub state: TaskState,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}

/// Sending half of the progress stream
pub type ProgressSender = UnboundedSender<ProgressEvent>;

/// Bounded retries with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(2),
        }
    }
}

/// Worker-private directory removed on drop
#[derive(Debug)]
pub(crate) struct ScratchDir {
    /// Location of the directory
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh directory under `root`, named after `name`
    pub(crate) fn acquire(root: &Path, name: &str) -> Result<Self, OrgBackupError> {
        create_dir_all(root)?;
        loop {
            let suffix: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect();
            let path = root.join(format!("{}-{suffix}", name.replace(['/', '\\'], "_")));
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Location of the directory
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clean up {}: {e}", self.path.display()),
        }
    }
}

/// Everything a worker needs, shared by the whole pool
pub struct Worker {
    /// Source organization
    source_org: String,
    /// Destination organization
    dest_org: String,
    /// Source catalog, for remote URLs
    source: Arc<dyn Catalog>,
    /// Destination catalog
    destination: Arc<dyn Catalog>,
    /// Version control backend
    vcs: Arc<dyn VersionControl>,
    /// Credential of the source organization
    source_credential: Credential,
    /// Credential of the destination organization
    destination_credential: Credential,
    /// Root of the scratch directories
    clone_dir: PathBuf,
    /// Retry policy of the clone, create and push steps
    retry: RetryPolicy,
    /// Progress stream
    events: Option<ProgressSender>,
    /// Tripped when the user interrupts the run
    cancel: CancellationToken,
}

/// Shared pieces a [`Worker`] is built from
pub struct WorkerSetup {
    /// Source organization
    pub source_org: String,
    /// Destination organization
    pub dest_org: String,
    /// Source catalog
    pub source: Arc<dyn Catalog>,
    /// Destination catalog
    pub destination: Arc<dyn Catalog>,
    /// Version control backend
    pub vcs: Arc<dyn VersionControl>,
    /// Credential of the source organization
    pub source_credential: Credential,
    /// Credential of the destination organization
    pub destination_credential: Credential,
    /// Root of the scratch directories
    pub clone_dir: PathBuf,
    /// Retry policy
    pub retry: RetryPolicy,
}

impl Worker {
    /// Create a worker
    pub fn new(
        setup: WorkerSetup,
        events: Option<ProgressSender>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source_org: setup.source_org,
            dest_org: setup.dest_org,
            source: setup.source,
            destination: setup.destination,
            vcs: setup.vcs,
            source_credential: setup.source_credential,
            destination_credential: setup.destination_credential,
            clone_dir: setup.clone_dir,
            retry: setup.retry,
            events,
            cancel,
        }
    }

    /// Run the state machine of `task` to a terminal state
    pub async fn run(&self, mut task: MigrationTask) -> TransferResult {
        let started = Instant::now();
        let outcome = self.transfer(&mut task).await;
        let (outcome, error) = match outcome {
            Ok(warnings) => {
                for warning in &warnings {
                    warn!("{}: {warning}", task.destination_name);
                }
                self.transition(&mut task, TaskState::Succeeded);
                info!("{} -> {}: synced", task.source_name, task.destination_name);
                (Outcome::Succeeded, None)
            }
            Err(e) => {
                let error = TaskError {
                    step: task.status,
                    kind: e.kind(),
                    message: e.to_string(),
                    attempts: task.attempts,
                };
                warn!("{} -> {}: {error}", task.source_name, task.destination_name);
                task.last_error = Some(error.clone());
                self.transition(&mut task, TaskState::Failed);
                (Outcome::Failed, Some(error))
            }
        };
        TransferResult {
            source_name: task.source_name,
            destination_name: task.destination_name,
            outcome,
            error,
            planned_action: None,
            attempts: task.attempts,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Close `task` without running it
    pub fn skip(&self, mut task: MigrationTask, planned_action: Option<String>) -> TransferResult {
        self.transition(&mut task, TaskState::Skipped);
        TransferResult::skipped(&task, planned_action)
    }

    /// Clone, create and push; the scratch directory is gone when this returns
    async fn transfer(&self, task: &mut MigrationTask) -> Result<Vec<String>, OrgBackupError> {
        self.transition(task, TaskState::Cloning);
        let scratch = {
            let root = self.clone_dir.as_path();
            let name = task.source_name.clone();
            let name = name.as_str();
            let acquire = move || async move { ScratchDir::acquire(root, name) };
            self.attempt(task, acquire).await?
        };
        let mirror = scratch.path().join("mirror.git");
        let source_url = self.source.remote_url(&self.source_org, &task.source_name);
        {
            let source_url = &source_url;
            let mirror = &mirror;
            self.attempt(task, move || {
                let vcs = Arc::clone(&self.vcs);
                let url = source_url.clone();
                let credential = self.source_credential.clone();
                let dest = mirror.clone();
                self.blocking(move || {
                    if dest.exists() {
                        remove_dir_all(&dest)?;
                    }
                    vcs.mirror_clone(&url, &credential, &dest)
                })
            })
            .await?;
        }

        self.transition(task, TaskState::Creating);
        let request = CreateRepository::mirroring(&task.destination_name, &task.source);
        {
            let request = &request;
            let dest_org = self.dest_org.as_str();
            let destination = &self.destination;
            self.attempt(task, move || {
                self.cancellable(async move {
                    match destination.create_repository(dest_org, request).await {
                        Ok(_) => Ok(()),
                        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                            info!("Repository {dest_org}/{} exists, reusing it", request.name);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                })
            })
            .await?;
        }

        self.transition(task, TaskState::Pushing);
        let destination_url = self
            .destination
            .remote_url(&self.dest_org, &task.destination_name);
        let excluded = vec![PULL_REQUEST_REF_PREFIX.to_string()];
        let warnings = {
            let destination_url = &destination_url;
            let mirror = &mirror;
            let excluded = &excluded;
            self.attempt(task, move || {
                let vcs = Arc::clone(&self.vcs);
                let url = destination_url.clone();
                let credential = self.destination_credential.clone();
                let repo_dir = mirror.clone();
                let excluded = excluded.clone();
                self.blocking(move || vcs.push_all(&repo_dir, &url, &credential, &excluded))
            })
            .await?
        };
        drop(scratch);
        Ok(warnings)
    }

    /// Run `op` until it succeeds, fails for good, or runs out of retries
    async fn attempt<T, F, Fut>(
        &self,
        task: &mut MigrationTask,
        mut op: F,
    ) -> Result<T, OrgBackupError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrgBackupError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            task.attempts = task.attempts.max(attempt);
            if self.cancel.is_cancelled() {
                return Err(interrupted());
            }
            match op().await {
                Err(e) if e.is_retryable() && attempt <= self.retry.retries => {
                    warn!(
                        "{}: {} attempt {attempt} failed, retrying in {:?}: {e}",
                        task.source_name, task.status, self.retry.delay
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(interrupted()),
                        _ = tokio::time::sleep(self.retry.delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    /// Give up on `work` as soon as the run is interrupted
    async fn cancellable<T>(
        &self,
        work: impl Future<Output = Result<T, OrgBackupError>>,
    ) -> Result<T, OrgBackupError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(interrupted()),
            result = work => result,
        }
    }

    /// Run blocking version control work off the async runtime.
    ///
    /// libgit2 can't be stopped from outside. When the run is interrupted the
    /// thread is still waited for, so it is done with the scratch directory
    /// before the directory is removed.
    async fn blocking<T, F>(&self, work: F) -> Result<T, OrgBackupError>
    where
        F: FnOnce() -> Result<T, OrgBackupError> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = tokio::task::spawn_blocking(work);
        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            joined = &mut handle => Some(joined),
        };
        match joined {
            Some(joined) => joined.map_err(|e| {
                let text = "version control thread failed";
                OrgBackupError::new_with_source(ErrorKind::Other, text, e)
            })?,
            None => {
                debug!("Interrupted, waiting for the version control thread");
                let _ = handle.await;
                Err(interrupted())
            }
        }
    }

    /// Move `task` to `state` and tell the reporter
    fn transition(&self, task: &mut MigrationTask, state: TaskState) {
        debug!("{}: {} -> {state}", task.source_name, task.status);
        task.status = state;
        if let Some(events) = &self.events {
            // the reporter may already be gone
            let _ = events.send(ProgressEvent {
                task_name: task.source_name.clone(),
                state,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Error of an abandoned step
fn interrupted() -> OrgBackupError {
    OrgBackupError::new(ErrorKind::Interrupted).with_text("run interrupted by the user")
}
