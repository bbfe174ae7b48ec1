//! `Better Sync` Core Library
//!
//! This crate keeps music and playlists in sync on devices that expose an
//! MTP-style object store, where objects are numeric handles in a
//! parent/child tree and there is no path API:
//! - Catalog scanning of audio files and playlists
//! - Logical path to handle resolution with layered fallbacks
//! - Idempotent folder find-or-create
//! - Uploads and deletes that survive an unreliable transport
//! - Playlist encoding and decoding in several path styles
//! - Top-level sync operations with user confirmation
//!
//! The device itself is reached through the [`Transport`] trait.
//! [`MemoryTransport`] implements it in memory for tests and dry runs.
//!
//! # Error Handling
//!
//! This crate uses typed errors for each domain. See the [`error`] module for
//! details.
//!
//! ```rust,ignore
//! use bettersync_core::{Error, ErrorKind, Result};
//!
//! match sync.delete_folder(storage, "/Music", &prompter) {
//!     Err(e) if e.kind() == ErrorKind::SafetyRejected => println!("Not erased"),
//!     other => other.map(|_| ())?,
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod delete;
pub mod error;
pub mod folder;
pub mod logging;
pub mod memory;
pub mod metadata;
pub mod path;
pub mod playlist;
pub mod resolver;
pub mod retry;
pub mod sanitize;
pub mod session;
pub mod sync;
pub mod transfer;
pub mod transport;

pub use catalog::{Catalog, CatalogEntry, CatalogScanner, ObjectClass};
pub use config::{
    ConfigManager, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PARTIAL_TRANSFER_BYTES, RetryConfig,
    SyncConfig, TransferConfig,
};
pub use delete::{
    Confirmed, DeleteMethod, DeleteReport, EraseEverything, FolderDeleteConfirmation,
};
pub use error::{
    DeleteError, DeviceError, Error, ErrorContext, ErrorKind, FileSystemError, PathError,
    PlaylistError, Result, TransferError, TransportError, TransportResult,
};
pub use folder::FolderNavigator;
pub use memory::{Fault, MemoryTransport, TransportOp};
pub use metadata::{TrackPlacement, TrackTags, read_tags};
pub use path::{LogicalPath, normalize, path_variations};
pub use playlist::{PathStyle, PlaylistDocument, PlaylistEntry, decode, encode, track_display_name};
pub use resolver::{PathResolver, Resolved, Strategy};
pub use retry::{RetryOutcome, RetryPolicy, Retryable, with_retry};
pub use sanitize::{sanitize_file_name, sanitize_folder_name, validate_playlist_name};
pub use session::{Connector, DeviceSession, select_storage};
pub use sync::{
    AssumeYes, DevicePlaylist, DirectoryUpload, PlaylistListing, Prompter, SyncOrchestrator,
    TrackUpload,
};
pub use transfer::{
    TransferEngine, TransferJob, TransferSource, UploadReport, UploadStatus, Verification,
};
pub use transport::{
    DeviceObject, ObjectFormat, PARENT_ROOT, Storage, Transport, TreeWalk, WalkEntry,
};
