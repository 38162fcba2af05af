//! Error taxonomy for the synchronization engine
//!
//! Every variant is scoped: path and lookup errors end one resource group,
//! download errors skip one file. Nothing here is fatal to the process.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while synchronizing a resource group
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Insecure path {path:?}, which is out of working directory {root:?}")]
    InsecurePath { path: PathBuf, root: PathBuf },

    #[error("Directory {0:?} does not exist")]
    DirectoryNotFound(PathBuf),

    #[error("Invalid file pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("Remote lookup against {provider} failed: {source}")]
    RemoteLookup {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to download {url}: {source}")]
    DownloadFailure {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("No response from {target} within {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from scoping the group directory
    pub fn is_scope_error(&self) -> bool {
        matches!(
            self,
            SyncError::InsecurePath { .. } | SyncError::DirectoryNotFound(_)
        )
    }
}
