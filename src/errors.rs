//! Error taxonomy shared by every backend.
//!
//! The closed set of kinds below is the whole public error surface:
//! callers match on `VfsError` variants, while the causal chain from the
//! backing store stays reachable through [`VfsError::Backend`].

use std::fmt;

/// Operation tag attached to wrapped backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
    Seek,
    Close,
    CopyToFile,
    CopyToLocation,
    MoveToFile,
    MoveToLocation,
    Delete,
    LastModified,
    Size,
    Touch,
    Exists,
    List,
    Open,
    Upload,
    Download,
}

impl Op {
    /// Stable string form used in log fields and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Read => "read",
            Op::Write => "write",
            Op::Seek => "seek",
            Op::Close => "close",
            Op::CopyToFile => "copy-to-file",
            Op::CopyToLocation => "copy-to-location",
            Op::MoveToFile => "move-to-file",
            Op::MoveToLocation => "move-to-location",
            Op::Delete => "delete",
            Op::LastModified => "last-modified",
            Op::Size => "size",
            Op::Touch => "touch",
            Op::Exists => "exists",
            Op::List => "list",
            Op::Open => "open",
            Op::Upload => "upload",
            Op::Download => "download",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed source preserved under a wrapped backend error.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// A copy or move was requested while the source stream was not at
    /// position zero.
    #[error("copy not possible: source stream is not at position 0")]
    CopyToNotPossible,

    /// The target object does not exist on its backend.
    #[error("file does not exist")]
    NotExist,

    /// A seek resolved to a negative absolute offset.
    #[error("seek: invalid offset")]
    SeekInvalidOffset,

    /// A seek was requested with an unrecognized whence.
    #[error("seek: invalid whence")]
    SeekInvalidWhence,

    #[error("absolute file path {path:?} is invalid")]
    BadAbsFilePath { path: String },

    #[error("absolute location path {path:?} is invalid")]
    BadAbsLocationPath { path: String },

    #[error("relative file path {path:?} is invalid")]
    BadRelFilePath { path: String },

    #[error("relative location path {path:?} is invalid")]
    BadRelLocationPath { path: String },

    /// No registered backend prefix-matches the URI.
    #[error("no registered backend matches {uri:?}")]
    UnknownScheme { uri: String },

    #[error("invalid uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The backing store cannot perform this operation at all.
    #[error("{op}: not supported by this backend")]
    Unsupported { op: Op },

    /// Any other backend failure, wrapped with its operation tag.
    #[error("{op} failed")]
    Backend {
        op: Op,
        #[source]
        source: BoxedSource,
    },
}

impl VfsError {
    /// Wrap an arbitrary backend error with an operation tag.
    pub fn backend(op: Op, source: impl Into<BoxedSource>) -> Self {
        VfsError::Backend {
            op,
            source: source.into(),
        }
    }

    /// Map an I/O error, folding `NotFound` into the canonical kind.
    pub fn from_io(op: Op, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotExist,
            std::io::ErrorKind::InvalidInput if op == Op::Seek => VfsError::SeekInvalidOffset,
            _ => VfsError::backend(op, err),
        }
    }

    /// Map an opendal error, folding `NotFound` and `Unsupported` into
    /// their canonical kinds.
    pub(crate) fn from_opendal(op: Op, err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => VfsError::NotExist,
            opendal::ErrorKind::Unsupported => VfsError::Unsupported { op },
            _ => VfsError::backend(op, err),
        }
    }

    pub fn is_not_exist(&self) -> bool {
        matches!(self, VfsError::NotExist)
    }
}

/// Crate-wide result alias.
pub type Result<T, E = VfsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_tags_are_stable() {
        assert_eq!(Op::CopyToFile.as_str(), "copy-to-file");
        assert_eq!(Op::LastModified.to_string(), "last-modified");
    }

    #[test]
    fn io_not_found_maps_to_not_exist() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(VfsError::from_io(Op::Read, io).is_not_exist());
    }

    #[test]
    fn wrapped_errors_keep_their_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = VfsError::from_io(Op::Write, io);
        match err {
            VfsError::Backend { op, ref source } => {
                assert_eq!(op, Op::Write);
                assert!(source.to_string().contains("denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
