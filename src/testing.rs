//! In-memory catalog and scripted version control for tests
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fs::create_dir_all,
    path::Path,
    sync::Mutex,
    thread::sleep,
    time::Duration,
};

use crate::{
    auth::Credential,
    errors::{ErrorKind, OrgBackupError},
    git::{is_excluded, VersionControl},
    platform::{Catalog, CatalogFuture, CreateRepository},
    utils::RepositoryDescriptor,
};

/// Error injected by a test double
fn scripted(kind: ErrorKind, operation: &str) -> OrgBackupError {
    OrgBackupError::new(kind).with_text(&format!("scripted {operation} failure"))
}

/// Descriptor with a `main` default branch
pub(crate) fn descriptor(name: &str, private: bool) -> RepositoryDescriptor {
    RepositoryDescriptor {
        name: name.to_string(),
        is_private: private,
        default_branch: "main".to_string(),
        description: None,
        size_hint: None,
    }
}

#[derive(Default)]
struct CatalogState {
    repos: BTreeMap<String, Vec<RepositoryDescriptor>>,
    created: Vec<String>,
    deleted: Vec<String>,
    create_calls: usize,
    list_error: Option<ErrorKind>,
    create_errors: VecDeque<ErrorKind>,
    delete_error: Option<ErrorKind>,
}

/// Catalog keeping its organizations in memory
#[derive(Default)]
pub(crate) struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub(crate) fn add_repo(&self, org: &str, repo: RepositoryDescriptor) {
        let mut state = self.state.lock().unwrap();
        state.repos.entry(org.to_string()).or_default().push(repo);
    }

    pub(crate) fn add_existing(&self, org: &str, name: &str) {
        self.add_repo(org, descriptor(name, false));
    }

    pub(crate) fn fail_list(&self, kind: ErrorKind) {
        self.state.lock().unwrap().list_error = Some(kind);
    }

    /// Make the next creations fail with `kinds`, in order
    pub(crate) fn fail_create(&self, kinds: &[ErrorKind]) {
        let mut state = self.state.lock().unwrap();
        state.create_errors.extend(kinds.iter().copied());
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub(crate) fn fail_delete(&self, kind: ErrorKind) {
        self.state.lock().unwrap().delete_error = Some(kind);
    }

    /// `org/name` of every created repository, in creation order
    pub(crate) fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    /// `org/name` of every deleted repository, in deletion order
    pub(crate) fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub(crate) fn names(&self, org: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(org)
            .map(|repos| repos.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }
}

impl Catalog for MemoryCatalog {
    fn list_repositories<'a>(
        &'a self,
        org: &'a str,
    ) -> CatalogFuture<'a, Vec<RepositoryDescriptor>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if let Some(kind) = state.list_error {
                return Err(scripted(kind, "list"));
            }
            Ok(state.repos.get(org).cloned().unwrap_or_default())
        })
    }

    fn create_repository<'a>(
        &'a self,
        org: &'a str,
        request: &'a CreateRepository,
    ) -> CatalogFuture<'a, RepositoryDescriptor> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.create_calls += 1;
            if let Some(kind) = state.create_errors.pop_front() {
                return Err(scripted(kind, "create"));
            }
            let repos = state.repos.entry(org.to_string()).or_default();
            if repos
                .iter()
                .any(|r| r.name.eq_ignore_ascii_case(&request.name))
            {
                return Err(OrgBackupError::new(ErrorKind::AlreadyExists)
                    .with_text("name already exists on this account"));
            }
            let repo = RepositoryDescriptor {
                name: request.name.clone(),
                is_private: request.private,
                default_branch: "main".to_string(),
                description: request.description.clone(),
                size_hint: None,
            };
            repos.push(repo.clone());
            state.created.push(format!("{org}/{}", request.name));
            Ok(repo)
        })
    }

    fn delete_repository<'a>(&'a self, org: &'a str, name: &'a str) -> CatalogFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(kind) = state.delete_error {
                return Err(scripted(kind, "delete"));
            }
            if let Some(repos) = state.repos.get_mut(org) {
                repos.retain(|r| r.name != name);
            }
            state.deleted.push(format!("{org}/{name}"));
            Ok(())
        })
    }

    fn remote_url(&self, org: &str, name: &str) -> String {
        format!("mem://{org}/{name}")
    }
}

struct VcsState {
    refs: Vec<String>,
    clone_failures: HashMap<String, VecDeque<ErrorKind>>,
    clone_delay: Duration,
    push_failures: VecDeque<ErrorKind>,
    push_calls: usize,
    cloned: Vec<String>,
    pushes: Vec<(String, Vec<String>)>,
    warnings: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Default for VcsState {
    fn default() -> Self {
        Self {
            refs: vec![
                "refs/heads/main".to_string(),
                "refs/pull/1/head".to_string(),
                "refs/tags/v1".to_string(),
            ],
            clone_failures: HashMap::new(),
            clone_delay: Duration::from_millis(20),
            push_failures: VecDeque::new(),
            push_calls: 0,
            cloned: vec![],
            pushes: vec![],
            warnings: vec![],
            in_flight: 0,
            max_in_flight: 0,
        }
    }
}

/// Version control double that records calls and fails on demand
#[derive(Default)]
pub(crate) struct ScriptedVcs {
    state: Mutex<VcsState>,
}

impl ScriptedVcs {
    /// Make the next clones of `url` fail with `kinds`, in order
    pub(crate) fn fail_clone(&self, url: &str, kinds: &[ErrorKind]) {
        let mut state = self.state.lock().unwrap();
        state
            .clone_failures
            .entry(url.to_string())
            .or_default()
            .extend(kinds.iter().copied());
    }

    /// Make the next pushes fail with `kinds`, in order
    pub(crate) fn fail_push(&self, kinds: &[ErrorKind]) {
        let mut state = self.state.lock().unwrap();
        state.push_failures.extend(kinds.iter().copied());
    }

    /// Time every clone takes
    pub(crate) fn clone_delay(&self, delay: Duration) {
        self.state.lock().unwrap().clone_delay = delay;
    }

    pub(crate) fn push_calls(&self) -> usize {
        self.state.lock().unwrap().push_calls
    }

    pub(crate) fn warn_on_push(&self, warning: &str) {
        self.state
            .lock()
            .unwrap()
            .warnings
            .push(warning.to_string());
    }

    pub(crate) fn clone_calls(&self) -> usize {
        self.state.lock().unwrap().cloned.len()
    }

    pub(crate) fn pushed_urls(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.pushes.iter().map(|(url, _)| url.clone()).collect()
    }

    pub(crate) fn pushed_refs(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .pushes
            .iter()
            .flat_map(|(_, refs)| refs.iter().cloned())
            .collect()
    }

    /// Most clones that ran at the same time
    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }
}

impl VersionControl for ScriptedVcs {
    fn mirror_clone(
        &self,
        url: &str,
        _credential: &Credential,
        dest: &Path,
    ) -> Result<(), OrgBackupError> {
        let (failure, delay) = {
            let mut state = self.state.lock().unwrap();
            state.cloned.push(url.to_string());
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            let failure = state
                .clone_failures
                .get_mut(url)
                .and_then(VecDeque::pop_front);
            (failure, state.clone_delay)
        };
        // leave time for other workers to overlap
        sleep(delay);
        self.state.lock().unwrap().in_flight -= 1;
        if let Some(kind) = failure {
            return Err(scripted(kind, "clone"));
        }
        create_dir_all(dest.join("objects"))?;
        Ok(())
    }

    fn push_all(
        &self,
        repo_dir: &Path,
        url: &str,
        _credential: &Credential,
        excluded_prefixes: &[String],
    ) -> Result<Vec<String>, OrgBackupError> {
        assert!(repo_dir.exists(), "push without a mirror");
        let mut state = self.state.lock().unwrap();
        state.push_calls += 1;
        if let Some(kind) = state.push_failures.pop_front() {
            return Err(scripted(kind, "push"));
        }
        let refs = state
            .refs
            .iter()
            .filter(|r| !is_excluded(r, excluded_prefixes))
            .cloned()
            .collect();
        state.pushes.push((url.to_string(), refs));
        Ok(state.warnings.clone())
    }
}
