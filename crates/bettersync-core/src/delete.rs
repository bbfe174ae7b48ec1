//! Deletion with retries, fallback and safety gates.
//!
//! Devices refuse deletes for all sorts of transient reasons, and some refuse
//! to delete an object whose metadata still claims content. A delete is
//! therefore attempted directly a few times, then the object's size is
//! zeroed and re-registered before one last delete.
//!
//! Destructive calls take a confirmation token. An ordinary [`Confirmed`]
//! covers files and ordinary folders. The storage root and the music root
//! additionally need an [`EraseEverything`] token, which can only be built
//! from the exact phrase the user typed. Without it those deletions fail
//! with `SafetyRejected` before any transport call.
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::delete::{Confirmed, EraseEverything, FolderDeleteConfirmation};
//!
//! engine.delete_folder(storage, "/Music/OLD", Confirmed::by_user().into())?;
//!
//! let token = EraseEverything::from_phrase(&typed).ok_or("phrase mismatch")?;
//! engine.delete_folder(storage, "/Music", FolderDeleteConfirmation::EraseEverything(token))?;
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{DeleteError, Error, ErrorContext, PathError, Result, TransportResult};
use crate::logging;
use crate::path::{self, LogicalPath};
use crate::resolver::PathResolver;
use crate::retry::{self, RetryOutcome, with_retry};
use crate::transfer::TransferEngine;
use crate::transport::{PARENT_ROOT, Transport};

// =============================================================================
// Confirmation tokens
// =============================================================================

/// Proof that the user confirmed a destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmed(());

impl Confirmed {
    /// Record that the user said yes.
    #[must_use]
    pub const fn by_user() -> Self {
        Self(())
    }
}

/// Heightened confirmation required to empty the storage or music root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseEverything(());

impl EraseEverything {
    /// The phrase the user must type.
    pub const PHRASE: &'static str = "ERASE EVERYTHING";

    /// Build the token if `typed` is exactly [`EraseEverything::PHRASE`].
    #[must_use]
    pub fn from_phrase(typed: &str) -> Option<Self> {
        (typed.trim() == Self::PHRASE).then_some(Self(()))
    }
}

/// Confirmation accepted by [`TransferEngine::delete_folder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderDeleteConfirmation {
    /// Ordinary confirmation; enough for folders other than the roots.
    Confirmed(Confirmed),
    /// Heightened confirmation; also allows the roots.
    EraseEverything(EraseEverything),
}

impl From<Confirmed> for FolderDeleteConfirmation {
    fn from(token: Confirmed) -> Self {
        Self::Confirmed(token)
    }
}

impl From<EraseEverything> for FolderDeleteConfirmation {
    fn from(token: EraseEverything) -> Self {
        Self::EraseEverything(token)
    }
}

// =============================================================================
// Reports
// =============================================================================

/// How an object was finally deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMethod {
    /// A direct delete succeeded.
    Direct {
        /// Attempt that succeeded.
        attempts: u32,
    },
    /// Zeroing the size and re-registering made the delete succeed.
    ZeroSizeFallback,
}

/// Counts from a folder deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    /// Files removed.
    pub files_deleted: usize,
    /// Folders removed.
    pub folders_deleted: usize,
    /// Items that could not be listed, inspected or removed.
    pub failed_items: usize,
}

impl DeleteReport {
    /// Whether anything failed.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed_items > 0
    }
}

impl std::fmt::Display for DeleteReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} files and {} folders deleted, {} failed",
            self.files_deleted, self.folders_deleted, self.failed_items
        )
    }
}

// =============================================================================
// Engine
// =============================================================================

impl<T: Transport + ?Sized> TransferEngine<'_, T> {
    /// Whether `folder_path` is the storage root or the music root.
    #[must_use]
    pub fn is_protected(&self, folder_path: &str) -> bool {
        let path = LogicalPath::new(folder_path);
        path.is_root() || path == LogicalPath::new(self.music_root.as_str())
    }

    /// Delete one file, falling back to the zero-size method.
    ///
    /// Folders are refused: use [`TransferEngine::delete_folder`], which
    /// applies the root gate.
    ///
    /// # Errors
    ///
    /// Returns `IsAFolder` for folder handles, the transport error when the
    /// object cannot be inspected, and `DeleteError::Failed` when every
    /// method failed.
    pub fn delete_object(&self, handle: u32, _confirmed: Confirmed) -> Result<DeleteMethod> {
        logging::scoped(&self.dispatch, || {
            let info = retry::object_info(self.transport, &self.listing, handle)
                .with_context(|| format!("inspecting handle {handle} before delete"))?;
            if info.is_folder() {
                warn!("Refusing to delete folder {} (handle {}) as a file", info.filename, handle);
                return Err(Error::Path(PathError::IsAFolder {
                    path: info.filename,
                }));
            }
            self.delete_with_fallback(handle)
        })
    }

    /// Delete a folder and everything below it.
    ///
    /// Sub-folders are emptied and removed first, then files, then the folder
    /// itself. Deleting `/` removes its contents only. Completed deletions are
    /// not rolled back when a later item fails.
    ///
    /// # Errors
    ///
    /// Returns `SafetyRejected` for the storage or music root without an
    /// [`EraseEverything`] token, `NotFound` when the folder does not exist,
    /// and `PartialFailure` carrying the counts when any item failed.
    pub fn delete_folder(
        &self,
        storage_id: u32,
        folder_path: &str,
        confirmation: FolderDeleteConfirmation,
    ) -> Result<DeleteReport> {
        logging::scoped(&self.dispatch, || {
            if self.is_protected(folder_path)
                && !matches!(confirmation, FolderDeleteConfirmation::EraseEverything(_))
            {
                warn!("Refusing to delete protected folder {}", folder_path);
                return Err(Error::Delete(DeleteError::SafetyRejected {
                    path: folder_path.to_string(),
                }));
            }

            let handle = PathResolver::new(self.transport, self.dispatch.clone())
                .with_listing_policy(self.listing)
                .find_folder(storage_id, folder_path)?;

            let normalized = path::normalize(folder_path);
            info!("Deleting folder {} (handle {})", normalized, handle);

            let mut report = DeleteReport::default();
            self.delete_tree(storage_id, handle, &normalized, handle != PARENT_ROOT, &mut report);

            if report.has_failures() {
                error!("Deletion of {} finished with failures: {}", normalized, report);
                return Err(Error::Delete(DeleteError::PartialFailure {
                    target: normalized,
                    report,
                }));
            }
            info!("Deleted {}: {}", normalized, report);
            Ok(report)
        })
    }

    fn delete_tree(
        &self,
        storage_id: u32,
        handle: u32,
        folder_path: &str,
        delete_self: bool,
        report: &mut DeleteReport,
    ) {
        let children =
            match retry::list_children(self.transport, &self.listing, storage_id, handle) {
                Ok(children) => children,
                Err(e) => {
                    warn!("Cannot list {}: {}", folder_path, e);
                    report.failed_items += 1;
                    return;
                }
            };

        let mut folders = Vec::new();
        let mut files = Vec::new();
        for child in children {
            match retry::object_info(self.transport, &self.listing, child) {
                Ok(info) if info.is_folder() => folders.push(info),
                Ok(info) => files.push(info),
                Err(e) => {
                    warn!("Cannot inspect handle {} in {}: {}", child, folder_path, e);
                    report.failed_items += 1;
                }
            }
        }

        for folder in folders {
            let sub_path = format!("{}/{}", folder_path.trim_end_matches('/'), folder.filename);
            self.delete_tree(storage_id, folder.handle, &sub_path, true, report);
        }

        for file in files {
            match self.delete_with_fallback(file.handle) {
                Ok(_) => {
                    debug!("Deleted {}/{}", folder_path, file.filename);
                    report.files_deleted += 1;
                }
                Err(e) => {
                    warn!("Failed to delete {}/{}: {}", folder_path, file.filename, e);
                    report.failed_items += 1;
                }
            }
        }

        if delete_self {
            match self.delete_with_fallback(handle) {
                Ok(_) => report.folders_deleted += 1,
                Err(e) => {
                    warn!("Failed to delete folder {}: {}", folder_path, e);
                    report.failed_items += 1;
                }
            }
        }
    }

    pub(crate) fn delete_with_fallback(&self, handle: u32) -> Result<DeleteMethod> {
        let outcome = with_retry(&self.delete_policy, |attempt| {
            debug!("Deleting handle {} (attempt {})", handle, attempt);
            self.transport.delete_object(handle)
        });

        match outcome {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Degraded { attempts, .. } => {
                Ok(DeleteMethod::Direct { attempts })
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(
                    "Direct delete of handle {} failed after {} attempts ({}), \
                     trying zero-size method",
                    handle, attempts, last_error
                );
                match self.zero_size_delete(handle) {
                    Ok(()) => {
                        info!("Deleted handle {} with zero-size method", handle);
                        Ok(DeleteMethod::ZeroSizeFallback)
                    }
                    Err(e) => Err(Error::Delete(DeleteError::Failed {
                        handle,
                        attempts: attempts + 1,
                        source: e,
                    })),
                }
            }
        }
    }

    fn zero_size_delete(&self, handle: u32) -> TransportResult<()> {
        let mut info = self.transport.get_object_info(handle)?;
        info.size_bytes = 0;
        let registered = self
            .transport
            .set_object_info(info.storage_id, info.parent_handle, &info)?;
        self.transport.delete_object(handle)?;

        if registered != handle {
            // The device created a new object instead of updating the old one.
            if let Err(e) = self.transport.delete_object(registered) {
                warn!("Could not remove placeholder handle {}: {}", registered, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransportError};
    use crate::memory::{Fault, MemoryTransport, TransportOp};
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    const STORAGE: u32 = MemoryTransport::DEFAULT_STORAGE;

    fn engine(device: &MemoryTransport) -> TransferEngine<'_, MemoryTransport> {
        TransferEngine::new(device, logging::disabled())
            .with_delete_policy(RetryPolicy::new(3, Duration::ZERO))
            .with_listing_policy(RetryPolicy::new(1, Duration::ZERO))
    }

    #[test]
    fn test_erase_everything_requires_exact_phrase() {
        assert!(EraseEverything::from_phrase("ERASE EVERYTHING").is_some());
        assert!(EraseEverything::from_phrase(" ERASE EVERYTHING\n").is_some());
        assert!(EraseEverything::from_phrase("erase everything").is_none());
        assert!(EraseEverything::from_phrase("DELETE ALL").is_none());
    }

    #[test]
    fn test_delete_object_direct() {
        let device = MemoryTransport::new();
        let file = device.add_file(STORAGE, "/Music/a.mp3", b"abc");

        let method = engine(&device)
            .delete_object(file, Confirmed::by_user())
            .expect("delete");
        assert_eq!(method, DeleteMethod::Direct { attempts: 1 });
        assert!(!device.contains(file));
    }

    #[test]
    fn test_delete_object_uses_zero_size_fallback() {
        let device = MemoryTransport::new();
        let file = device.add_file(STORAGE, "/Music/a.mp3", b"abc");
        device.inject_fault(
            Fault::new(TransportOp::DeleteObject, TransportError::Busy)
                .for_handle(file)
                .times(3),
        );

        let method = engine(&device)
            .delete_object(file, Confirmed::by_user())
            .expect("delete");
        assert_eq!(method, DeleteMethod::ZeroSizeFallback);
        assert_eq!(device.calls(TransportOp::DeleteObject), 4);
        assert!(!device.contains(file));
    }

    #[test]
    fn test_delete_object_reports_failure() {
        let device = MemoryTransport::new();
        let file = device.add_file(STORAGE, "/Music/a.mp3", b"abc");
        device.inject_fault(
            Fault::new(TransportOp::DeleteObject, TransportError::Busy)
                .for_handle(file)
                .times(4),
        );

        let err = engine(&device)
            .delete_object(file, Confirmed::by_user())
            .expect_err("should fail");
        assert!(matches!(
            err,
            Error::Delete(DeleteError::Failed { attempts: 4, .. })
        ));
        assert!(device.contains(file));
    }

    #[test]
    fn test_delete_object_refuses_folders() {
        let device = MemoryTransport::new();
        let music = device.add_folder(STORAGE, "/Music");
        let album = device.add_folder(STORAGE, "/Music/Artist/Album");

        for handle in [music, album] {
            let err = engine(&device)
                .delete_object(handle, Confirmed::by_user())
                .expect_err("folder");
            assert!(matches!(err, Error::Path(PathError::IsAFolder { .. })));
            assert!(device.contains(handle));
        }
        assert_eq!(device.mutating_calls(), 0);
    }

    #[test]
    fn test_delete_object_missing_handle_carries_context() {
        let device = MemoryTransport::new();

        let err = engine(&device)
            .delete_object(42, Confirmed::by_user())
            .expect_err("missing");
        assert!(matches!(err, Error::Context { .. }));
        assert!(matches!(
            err.root(),
            Error::Transport(TransportError::NotFound { .. })
        ));
        assert_eq!(device.mutating_calls(), 0);
    }

    #[test]
    fn test_music_root_needs_heightened_token() {
        let device = MemoryTransport::new();
        device.add_file(STORAGE, "/Music/a.mp3", b"abc");

        for path in ["/Music", "0:/MUSIC", "music/", "/"] {
            let err = engine(&device)
                .delete_folder(STORAGE, path, Confirmed::by_user().into())
                .expect_err(path);
            assert_eq!(err.kind(), ErrorKind::SafetyRejected, "{path}");
        }
        assert_eq!(device.total_calls(), 0);
    }

    #[test]
    fn test_music_root_erased_with_token() {
        let device = MemoryTransport::new();
        device.add_file(STORAGE, "/Music/A/one.mp3", b"1");
        device.add_file(STORAGE, "/Music/two.mp3", b"2");
        let token = EraseEverything::from_phrase(EraseEverything::PHRASE).expect("token");

        let report = engine(&device)
            .delete_folder(STORAGE, "/Music", token.into())
            .expect("erase");
        assert_eq!(report.files_deleted, 2);
        assert_eq!(report.folders_deleted, 2);
        assert_eq!(device.object_count(), 0);
    }

    #[test]
    fn test_storage_root_keeps_nothing_but_root() {
        let device = MemoryTransport::new();
        device.add_file(STORAGE, "/Music/a.mp3", b"1");
        device.add_file(STORAGE, "/notes.txt", b"2");
        let token = EraseEverything::from_phrase(EraseEverything::PHRASE).expect("token");

        let report = engine(&device)
            .delete_folder(STORAGE, "/", token.into())
            .expect("erase");
        assert_eq!(report.files_deleted, 2);
        assert_eq!(report.folders_deleted, 1);
        assert_eq!(device.object_count(), 0);
    }

    #[test]
    fn test_delete_nested_folder() {
        let device = MemoryTransport::new();
        device.add_file(STORAGE, "/Music/OLD/A/1.mp3", b"1");
        device.add_file(STORAGE, "/Music/OLD/B/C/2.mp3", b"2");
        device.add_file(STORAGE, "/Music/OLD/3.mp3", b"3");
        let keep = device.add_file(STORAGE, "/Music/KEEP.mp3", b"4");

        let report = engine(&device)
            .delete_folder(STORAGE, "/music/old", Confirmed::by_user().into())
            .expect("delete");

        assert_eq!(report.files_deleted, 3);
        assert_eq!(report.folders_deleted, 4);
        assert!(device.handle_at(STORAGE, "/Music/OLD").is_none());
        assert!(device.contains(keep));
    }

    #[test]
    fn test_partial_failure_keeps_completed_deletions() {
        let device = MemoryTransport::new();
        let stuck = device.add_file(STORAGE, "/Music/OLD/stuck.mp3", b"1");
        let gone = device.add_file(STORAGE, "/Music/OLD/gone.mp3", b"2");
        device.inject_fault(
            Fault::new(TransportOp::DeleteObject, TransportError::Busy)
                .for_handle(stuck)
                .times(10),
        );

        let err = engine(&device)
            .delete_folder(STORAGE, "/Music/OLD", Confirmed::by_user().into())
            .expect_err("partial");

        match err {
            Error::Delete(DeleteError::PartialFailure { report, .. }) => {
                assert_eq!(report.files_deleted, 1);
                // The stuck file and its non-empty folder.
                assert_eq!(report.failed_items, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!device.contains(gone));
        assert!(device.contains(stuck));
    }

    #[test]
    fn test_missing_folder_is_not_found() {
        let device = MemoryTransport::new();
        let err = engine(&device)
            .delete_folder(STORAGE, "/Music/NOPE", Confirmed::by_user().into())
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
