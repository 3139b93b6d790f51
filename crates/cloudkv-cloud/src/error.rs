//! Error types for the cloud manifest subsystem.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Coarse classification of a [`CloudError`].
///
/// `NotFound` is benign almost everywhere and drives the fallback branches
/// (destination, then source, then "new database").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A file, object or registry entry does not exist.
    NotFound,
    /// Misconfiguration detected.
    InvalidArgument,
    /// Requested capability is not available.
    NotSupported,
    /// Persisted data failed validation.
    Corruption,
    /// Local I/O, transport or engine failure.
    Io,
}

/// Error variants for cloud operations.
#[derive(Debug, Error)]
pub enum CloudError {
    /// A local file or directory does not exist.
    #[error("Not found: {path:?}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// An object does not exist in the object store.
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Object key that was requested.
        key: String,
    },

    /// The registry has no entry for a dbid.
    #[error("Dbid {dbid} not registered in bucket {bucket}")]
    DbidNotRegistered {
        /// Bucket whose registry was consulted.
        bucket: String,
        /// The unregistered database identity.
        dbid: String,
    },

    /// Generic misconfiguration.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the problem.
        reason: String,
    },

    /// The registry maps the local dbid to a destination path different from
    /// the configured one.
    #[error("Destination path mismatch for dbid {dbid} in bucket {bucket}: configured '{configured}', registered '{registered}'")]
    DestPathMismatch {
        /// Local database identity.
        dbid: String,
        /// Destination bucket.
        bucket: String,
        /// Destination prefix from configuration.
        configured: String,
        /// Destination prefix stored in the registry.
        registered: String,
    },

    /// The configured cloud backend is not supported.
    #[error("Cloud backend not supported: {backend}")]
    NotSupported {
        /// Name of the backend.
        backend: String,
    },

    /// Local I/O failure other than not-found.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// Path the operation concerned.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Object store transport failure.
    #[error("Object store error on {bucket}/{key}: {reason}")]
    Transport {
        /// Bucket of the failed request.
        bucket: String,
        /// Key of the failed request.
        key: String,
        /// Description of the failure.
        reason: String,
    },

    /// The CLOUDMANIFEST document failed validation.
    #[error("Corrupted cloud manifest: {reason}")]
    CorruptedManifest {
        /// Description of the corruption.
        reason: String,
    },

    /// The cloud manifest was finalized and can no longer be modified.
    #[error("Cloud manifest is finalized")]
    ManifestFinalized,

    /// The cloud manifest was serialized before being finalized.
    #[error("Cloud manifest is not finalized")]
    ManifestNotFinalized,

    /// No cloud manifest has been loaded into the session.
    #[error("Cloud manifest not loaded for {local_dir:?}")]
    ManifestNotLoaded {
        /// Local database directory.
        local_dir: PathBuf,
    },

    /// The storage engine reported an error.
    #[error("Engine error: {reason}")]
    Engine {
        /// Description of the failure.
        reason: String,
    },

    /// Configuration file could not be parsed.
    #[error("Config error in {path:?}: {reason}")]
    Config {
        /// Configuration file path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A background worker task failed to complete.
    #[error("Worker task failed: {reason}")]
    TaskFailed {
        /// Description of the failure.
        reason: String,
    },
}

impl CloudError {
    /// Wraps an I/O error, turning `ErrorKind::NotFound` into [`CloudError::NotFound`].
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            CloudError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            CloudError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::NotFound { .. }
            | CloudError::ObjectNotFound { .. }
            | CloudError::DbidNotRegistered { .. } => ErrorKind::NotFound,
            CloudError::InvalidArgument { .. }
            | CloudError::DestPathMismatch { .. }
            | CloudError::Config { .. }
            | CloudError::ManifestFinalized
            | CloudError::ManifestNotFinalized
            | CloudError::ManifestNotLoaded { .. } => ErrorKind::InvalidArgument,
            CloudError::NotSupported { .. } => ErrorKind::NotSupported,
            CloudError::CorruptedManifest { .. } => ErrorKind::Corruption,
            CloudError::Io { .. }
            | CloudError::Transport { .. }
            | CloudError::Engine { .. }
            | CloudError::TaskFailed { .. } => ErrorKind::Io,
        }
    }

    /// Returns true for the benign not-found family.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
