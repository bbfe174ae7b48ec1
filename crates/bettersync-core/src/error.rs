//! Error types for Better Sync core operations.
//!
//! Errors are grouped by domain (transport, device session, path resolution,
//! transfers, deletion, playlists, local filesystem). Every error maps onto
//! an [`ErrorKind`] so callers can decide what to do without matching on
//! individual variants.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delete::DeleteReport;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for raw transport primitives.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

// =============================================================================
// Error taxonomy
// =============================================================================

/// Coarse classification of every error the crate can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, busy device, flaky I/O. Retried internally before surfacing.
    Transient,
    /// A path or handle does not exist.
    NotFound,
    /// Payload exceeds the upload limit.
    TooLarge,
    /// Malformed or ambiguous input.
    InvalidInput,
    /// Some items of a multi-item operation failed.
    PartialFailure,
    /// A destructive operation was refused by a safety gate.
    SafetyRejected,
    /// The user declined a confirmation prompt.
    Cancelled,
    /// Anything that cannot be recovered by retrying.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::NotFound => "not found",
            Self::TooLarge => "too large",
            Self::InvalidInput => "invalid input",
            Self::PartialFailure => "partial failure",
            Self::SafetyRejected => "safety rejected",
            Self::Cancelled => "cancelled",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Top-level error
// =============================================================================

/// Errors that can occur in Better Sync core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A transport primitive failed after internal retries.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Session or storage level failure.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Logical path could not be resolved or is malformed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Upload failure.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Deletion failure or refusal.
    #[error(transparent)]
    Delete(#[from] DeleteError),

    /// Playlist lookup or content failure.
    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    /// Local filesystem failure.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error annotated with the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: Box<Self>,
    },
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(e) => e.kind(),
            Self::Device(e) => e.kind(),
            Self::Path(e) => e.kind(),
            Self::Transfer(e) => e.kind(),
            Self::Delete(e) => e.kind(),
            Self::Playlist(e) => e.kind(),
            Self::FileSystem(e) => e.kind(),
            Self::Configuration(_) | Self::Serialization(_) => ErrorKind::InvalidInput,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Strip any [`Error::Context`] wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether retrying the whole operation later might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Extension trait for attaching operation context to results.
pub trait ErrorContext<T> {
    /// Wrap the error with a fixed context message.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built context message.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: f(),
            source: Box::new(e.into()),
        })
    }
}

// =============================================================================
// Domain errors
// =============================================================================

/// Failures reported by a transport primitive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The device did not answer in time.
    #[error("Transport timed out during {operation}")]
    Timeout {
        /// Primitive that timed out.
        operation: String,
    },

    /// The device reported it is busy.
    #[error("Device busy")]
    Busy,

    /// The device answered with a protocol-level failure code.
    #[error("Device responded with code {code:#06x}: {message}")]
    Protocol {
        /// Response code.
        code: u16,
        /// Human readable description.
        message: String,
    },

    /// The handle does not exist on the device.
    #[error("Object handle {handle} not found")]
    NotFound {
        /// Missing handle.
        handle: u32,
    },

    /// The device is gone.
    #[error("Device disconnected")]
    Disconnected,

    /// Local I/O failure while streaming data.
    #[error("Transport I/O failure: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the failure is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Busy | Self::Protocol { .. } | Self::Io(_)
        )
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Disconnected => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Session and storage errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A bounded wait elapsed.
    #[error("{operation} did not complete within {timeout:?}")]
    Timeout {
        /// Operation that was raced against the timeout.
        operation: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// Opening the session failed.
    #[error("Failed to open device session: {reason}")]
    ConnectFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// The device exposes no storage.
    #[error("Device reports no storage")]
    NoStorage,

    /// Requested storage is not present.
    #[error("Storage {storage_id:#010x} not found")]
    StorageNotFound {
        /// Requested storage id.
        storage_id: u32,
    },

    /// Multiple storages and no preference given.
    #[error("Device has {count} storages; a storage id must be chosen")]
    AmbiguousStorage {
        /// Number of storages present.
        count: usize,
    },

    /// The background task running a blocking call failed.
    #[error("Background device task failed: {reason}")]
    TaskFailed {
        /// Reason for the failure.
        reason: String,
    },
}

impl DeviceError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Transient,
            Self::NoStorage | Self::StorageNotFound { .. } => ErrorKind::NotFound,
            Self::AmbiguousStorage { .. } => ErrorKind::InvalidInput,
            Self::ConnectFailed { .. } | Self::TaskFailed { .. } => ErrorKind::Fatal,
        }
    }
}

/// Path resolution errors.
#[derive(Debug, Error)]
pub enum PathError {
    /// No resolution layer found the path.
    #[error("Path not found on device: {path}")]
    NotFound {
        /// The logical path as given.
        path: String,
    },

    /// The path cannot be used for the requested operation.
    #[error("Invalid path {path}: {reason}")]
    Invalid {
        /// The logical path as given.
        path: String,
        /// Why it is invalid.
        reason: String,
    },

    /// The path resolved to a file where a folder was expected.
    #[error("Not a folder: {path}")]
    NotAFolder {
        /// The logical path as given.
        path: String,
    },

    /// The path resolved to a folder where a file was expected.
    #[error("Is a folder: {path}")]
    IsAFolder {
        /// The logical path as given.
        path: String,
    },
}

impl PathError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Invalid { .. } | Self::NotAFolder { .. } | Self::IsAFolder { .. } => {
                ErrorKind::InvalidInput
            }
        }
    }
}

/// Upload errors.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Payload is above the upload limit.
    #[error("{filename} is {size} bytes, above the {limit} byte upload limit")]
    TooLarge {
        /// Target filename.
        filename: String,
        /// Payload size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// The job itself is malformed.
    #[error("Invalid transfer: {reason}")]
    InvalidJob {
        /// Why the job was rejected.
        reason: String,
    },

    /// Local source file could not be read.
    #[error("Cannot read source {path}: {reason}")]
    SourceUnreadable {
        /// Local source path.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Metadata registration failed.
    #[error("Failed to register {filename} after {attempts} attempts: {source}")]
    RegisterFailed {
        /// Target filename.
        filename: String,
        /// Attempts made.
        attempts: u32,
        /// Last transport error.
        #[source]
        source: TransportError,
    },

    /// Every send method failed.
    #[error("Failed to send {filename} (handle {handle}) after {attempts} attempts: {source}")]
    SendFailed {
        /// Target filename.
        filename: String,
        /// Handle that was registered.
        handle: u32,
        /// Attempts made, including the partial send.
        attempts: u32,
        /// Last transport error.
        #[source]
        source: TransportError,
    },
}

impl TransferError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::InvalidJob { .. } => ErrorKind::InvalidInput,
            Self::SourceUnreadable { .. } => ErrorKind::NotFound,
            Self::RegisterFailed { source, .. } | Self::SendFailed { source, .. } => source.kind(),
        }
    }
}

/// Deletion errors.
#[derive(Debug, Error)]
pub enum DeleteError {
    /// Deleting a root-equivalent folder without the heightened token.
    #[error("Refusing to delete {path} without the erase-everything confirmation")]
    SafetyRejected {
        /// The protected path.
        path: String,
    },

    /// Direct deletes and the zero-size fallback all failed.
    #[error("Failed to delete handle {handle} after {attempts} attempts: {source}")]
    Failed {
        /// Handle that could not be deleted.
        handle: u32,
        /// Attempts made, including the fallback.
        attempts: u32,
        /// Last transport error.
        #[source]
        source: TransportError,
    },

    /// Some items of a multi-item deletion failed.
    #[error("Deletion of {target} completed with {} failed deletions", report.failed_items)]
    PartialFailure {
        /// What was being deleted.
        target: String,
        /// Counts at the time the operation finished.
        report: DeleteReport,
    },
}

impl DeleteError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SafetyRejected { .. } => ErrorKind::SafetyRejected,
            Self::Failed { source, .. } => source.kind(),
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
        }
    }
}

/// Playlist errors.
#[derive(Debug, Error)]
pub enum PlaylistError {
    /// No playlist with that name exists on the device.
    #[error("Playlist not found: {name}")]
    NotFound {
        /// Requested name.
        name: String,
    },

    /// A playlist with that name already exists on the device.
    #[error("Playlist already exists: {name}")]
    AlreadyExists {
        /// Conflicting name.
        name: String,
    },

    /// More than one playlist matches.
    #[error("Playlist name {name} matches {count} playlists")]
    Ambiguous {
        /// Requested name.
        name: String,
        /// Number of matches.
        count: usize,
    },

    /// Name cannot be used for a playlist.
    #[error("Invalid playlist name '{name}': {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Playlist content is not valid text.
    #[error("Playlist {name} is not valid UTF-8")]
    InvalidEncoding {
        /// Playlist name.
        name: String,
    },

    /// The operation was declined at the confirmation prompt.
    #[error("{operation} cancelled by user")]
    Cancelled {
        /// Declined operation.
        operation: String,
    },
}

impl PlaylistError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::AlreadyExists { .. }
            | Self::Ambiguous { .. }
            | Self::InvalidName { .. }
            | Self::InvalidEncoding { .. } => ErrorKind::InvalidInput,
        }
    }
}

/// Local filesystem errors.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// Path does not exist.
    #[error("Path not found: {path}")]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// Reading failed.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// Path being read.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Writing failed.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Path being written.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Directory creation failed.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// Directory path.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },
}

impl FileSystemError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_transience() {
        assert!(TransportError::Busy.is_transient());
        assert!(
            TransportError::Timeout {
                operation: "list".to_string()
            }
            .is_transient()
        );
        assert!(!TransportError::NotFound { handle: 7 }.is_transient());
        assert!(!TransportError::Disconnected.is_transient());
    }

    #[test]
    fn test_kind_maps_through_context() {
        let err: Result<()> = Err(PathError::NotFound {
            path: "/Music/X.MP3".to_string(),
        }
        .into());
        let wrapped = err.context("resolving playlist entry").expect_err("should fail");

        assert_eq!(wrapped.kind(), ErrorKind::NotFound);
        assert!(matches!(wrapped.root(), Error::Path(PathError::NotFound { .. })));
        assert!(wrapped.to_string().starts_with("resolving playlist entry: "));
    }

    #[test]
    fn test_too_large_display() {
        let err = Error::Transfer(TransferError::TooLarge {
            filename: "SONG.MP3".to_string(),
            size: 11,
            limit: 10,
        });
        assert_eq!(err.kind(), ErrorKind::TooLarge);
        assert!(err.to_string().contains("SONG.MP3"));
    }

    #[test]
    fn test_partial_failure_display() {
        let err = DeleteError::PartialFailure {
            target: "/Music/OLD".to_string(),
            report: DeleteReport {
                files_deleted: 3,
                folders_deleted: 1,
                failed_items: 2,
            },
        };
        assert_eq!(
            err.to_string(),
            "Deletion of /Music/OLD completed with 2 failed deletions"
        );
        assert_eq!(err.kind(), ErrorKind::PartialFailure);
    }

    #[test]
    fn test_send_failed_inherits_transport_kind() {
        let err = TransferError::SendFailed {
            filename: "A.MP3".to_string(),
            handle: 4,
            attempts: 4,
            source: TransportError::Disconnected,
        };
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}
