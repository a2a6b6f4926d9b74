//! Per-operation option bundles.
//!
//! Options are tagged variants with a stable string name, so dispatch
//! layers can recognize them without knowing the concrete backend.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Options accepted by file factories.
#[derive(Debug, Clone)]
pub enum FileOption {
    /// MIME content type applied on the object's first upload.
    ContentType(String),
    /// Cancellation handle observed by every blocking call on the file.
    Cancel(CancellationToken),
}

impl FileOption {
    pub fn name(&self) -> &'static str {
        match self {
            FileOption::ContentType(_) => "newFileContentType",
            FileOption::Cancel(_) => "newFileContext",
        }
    }
}

/// Options accepted by location factories.
#[derive(Debug, Clone)]
pub enum LocationOption {
    /// Cancellation handle observed by operations on the location.
    Cancel(CancellationToken),
}

impl LocationOption {
    pub fn name(&self) -> &'static str {
        match self {
            LocationOption::Cancel(_) => "newLocationContext",
        }
    }
}

/// Options accepted by delete operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOption {
    /// Remove every version of a versioned object, not just the
    /// current one. Backends without versioning ignore it.
    AllVersions,
}

impl DeleteOption {
    pub fn name(&self) -> &'static str {
        match self {
            DeleteOption::AllVersions => "deleteAllVersions",
        }
    }
}

pub(crate) fn content_type(opts: &[FileOption]) -> Option<String> {
    opts.iter().find_map(|o| match o {
        FileOption::ContentType(ct) => Some(ct.clone()),
        _ => None,
    })
}

pub(crate) fn file_cancel_token(opts: &[FileOption]) -> Option<CancellationToken> {
    opts.iter().find_map(|o| match o {
        FileOption::Cancel(token) => Some(token.clone()),
        _ => None,
    })
}

pub(crate) fn location_cancel_token(opts: &[LocationOption]) -> Option<CancellationToken> {
    opts.iter().map(|LocationOption::Cancel(token)| token.clone()).next()
}

pub(crate) fn delete_all_versions(opts: &[DeleteOption]) -> bool {
    opts.contains(&DeleteOption::AllVersions)
}

/// Retry policy applied inside a backend's client layer.
///
/// Exponential backoff between attempts, capped at `max_backoff`.
/// Missing objects are never retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}
