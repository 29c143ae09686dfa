//! Error handling for the org-backup crate.
use std::{error::Error as StdError, fmt};

/// Error type for the org-backup crate.
#[derive(Debug)]
pub struct OrgBackupError {
    /// Inner error.
    inner: Box<Inner>,
}

impl OrgBackupError {
    /// Create a new error.
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            inner: Box::new(Inner {
                kind,
                message: None,
                source: None,
            }),
        }
    }

    /// Create a new error with a message and an underlying source.
    pub(crate) fn new_with_source<E>(kind: ErrorKind, text: &str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::new(kind).with_text(text).with_source(source)
    }

    /// Attach a human readable message.
    pub(crate) fn with_text(mut self, text: &str) -> Self {
        self.inner.message = Some(text.to_string());
        self
    }

    /// Attach an underlying source error.
    pub(crate) fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.inner.source = Some(source.into());
        self
    }

    /// Kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    /// Whether a bounded retry may fix this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::TransientNetwork | ErrorKind::Io)
    }
}

/// Type alias for a boxed error.
pub(crate) type BoxError = Box<dyn StdError + Send + Sync>;

/// Inner error type for the org-backup crate.
#[derive(Debug)]
struct Inner {
    /// Error kind.
    kind: ErrorKind,

    /// Message describing the failed operation.
    message: Option<String>,

    /// Source error.
    source: Option<BoxError>,
}

/// Classification of every error the tool can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid or expired credential.
    Auth,

    /// Organization or repository does not exist.
    NotFound,

    /// Destination repository is already present.
    AlreadyExists,

    /// Network failure while talking to the hosting platform.
    TransientNetwork,

    /// Local filesystem failure (including a full disk).
    Io,

    /// Pull-request style ref refused by the destination.
    UnwritableRef,

    /// Destination refused a regular branch or tag.
    PushRejected,

    /// Two repositories would land on the same destination name.
    DuplicateDestination,

    /// The run was interrupted by the user.
    Interrupted,

    /// Invalid configuration.
    Config,

    /// Error related to serde (JSON or TOML).
    Serde,

    /// Error reported by libgit2 that fits no other class.
    Git,

    /// Anything else.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Auth => "authentication error",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::TransientNetwork => "network error",
            ErrorKind::Io => "i/o error",
            ErrorKind::UnwritableRef => "unwritable ref",
            ErrorKind::PushRejected => "push rejected",
            ErrorKind::DuplicateDestination => "duplicate destination name",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Config => "configuration error",
            ErrorKind::Serde => "serialization error",
            ErrorKind::Git => "git error",
            ErrorKind::Other => "error",
        };
        f.write_str(name)
    }
}

impl fmt::Display for OrgBackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.kind)?;
        if let Some(message) = &self.inner.message {
            write!(f, ": {message}")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for OrgBackupError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

impl From<&str> for OrgBackupError {
    fn from(text: &str) -> Self {
        Self::new(ErrorKind::Other).with_text(text)
    }
}

impl From<String> for OrgBackupError {
    fn from(text: String) -> Self {
        Self::new(ErrorKind::Other).with_text(&text)
    }
}

impl From<reqwest::Error> for OrgBackupError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_decode() {
            ErrorKind::Serde
        } else {
            ErrorKind::TransientNetwork
        };
        Self::new(kind).with_source(e)
    }
}

impl From<serde_json::Error> for OrgBackupError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serde).with_source(e)
    }
}

impl From<toml::de::Error> for OrgBackupError {
    fn from(e: toml::de::Error) -> Self {
        Self::new(ErrorKind::Config).with_source(e)
    }
}

impl From<toml::ser::Error> for OrgBackupError {
    fn from(e: toml::ser::Error) -> Self {
        Self::new(ErrorKind::Serde).with_source(e)
    }
}

impl From<std::io::Error> for OrgBackupError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io).with_source(e)
    }
}

impl From<git2::Error> for OrgBackupError {
    fn from(e: git2::Error) -> Self {
        let kind = classify_git_error(&e);
        Self::new(kind).with_source(e)
    }
}

/// Map a libgit2 error onto the tool's taxonomy.
fn classify_git_error(e: &git2::Error) -> ErrorKind {
    let message = e.message().to_lowercase();
    if e.code() == git2::ErrorCode::Auth
        || message.contains("401")
        || message.contains("403")
        || message.contains("authentication")
    {
        return ErrorKind::Auth;
    }
    if e.code() == git2::ErrorCode::NotFound
        || message.contains("404")
        || message.contains("repository not found")
    {
        return ErrorKind::NotFound;
    }
    match e.class() {
        git2::ErrorClass::Net
        | git2::ErrorClass::Http
        | git2::ErrorClass::Ssl
        | git2::ErrorClass::Ssh
        | git2::ErrorClass::Os => ErrorKind::TransientNetwork,
        git2::ErrorClass::Filesystem => ErrorKind::Io,
        _ => ErrorKind::Git,
    }
}
