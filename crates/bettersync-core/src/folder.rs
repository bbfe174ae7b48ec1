//! Folder find-or-create.
//!
//! Folders are matched case-insensitively and created upper-cased. Creation
//! is idempotent: asking for the same folder twice yields the same handle and
//! creates nothing the second time. If creation fails, the folder is looked
//! up once more before the failure is surfaced, since another writer (or a
//! device that reported an error after creating the object) may have
//! produced it in the meantime.

use tracing::{Dispatch, debug, info, warn};

use crate::error::{Error, PathError, Result, TransportError};
use crate::logging;
use crate::path::split_components;
use crate::retry::{self, RetryPolicy};
use crate::transport::{DeviceObject, PARENT_ROOT, Transport};

/// Locates and creates folders.
pub struct FolderNavigator<'a, T: ?Sized> {
    transport: &'a T,
    dispatch: Dispatch,
    listing: RetryPolicy,
}

impl<'a, T: Transport + ?Sized> FolderNavigator<'a, T> {
    /// Create a navigator logging through `dispatch`.
    pub fn new(transport: &'a T, dispatch: Dispatch) -> Self {
        Self {
            transport,
            dispatch,
            listing: RetryPolicy::new(3, std::time::Duration::from_millis(100)),
        }
    }

    /// Use `policy` for listing retries.
    #[must_use]
    pub const fn with_listing_policy(mut self, policy: RetryPolicy) -> Self {
        self.listing = policy;
        self
    }

    /// First folder child of `parent_handle` named `name`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns an error if the children cannot be listed.
    pub fn find(&self, storage_id: u32, parent_handle: u32, name: &str) -> Result<Option<u32>> {
        let children =
            retry::children_info(self.transport, &self.listing, storage_id, parent_handle)?;
        Ok(children
            .into_iter()
            .find(|info| info.is_folder() && info.filename.eq_ignore_ascii_case(name))
            .map(|info| info.handle))
    }

    /// Handle of the folder `name` under `parent_handle`, creating it
    /// upper-cased when absent.
    ///
    /// # Errors
    ///
    /// Returns the creation error when the folder cannot be created and a
    /// second lookup still does not find it.
    pub fn find_or_create(&self, storage_id: u32, parent_handle: u32, name: &str) -> Result<u32> {
        logging::scoped(&self.dispatch, || {
            let name = name.trim();
            if name.is_empty() || name.contains('/') {
                return Err(Error::Path(PathError::Invalid {
                    path: name.to_string(),
                    reason: "folder name must be a single non-empty component".to_string(),
                }));
            }

            if let Some(handle) = self.find(storage_id, parent_handle, name)? {
                debug!("Found folder {} (handle {})", name, handle);
                return Ok(handle);
            }

            let upper = name.to_uppercase();
            let folder = DeviceObject::new_folder(storage_id, parent_handle, upper.as_str());
            match self.transport.set_object_info(storage_id, parent_handle, &folder) {
                Ok(handle) => {
                    info!("Created folder {} (handle {})", upper, handle);
                    Ok(handle)
                }
                Err(create_err) => self.recover_after_failed_create(
                    storage_id,
                    parent_handle,
                    &upper,
                    create_err,
                ),
            }
        })
    }

    fn recover_after_failed_create(
        &self,
        storage_id: u32,
        parent_handle: u32,
        name: &str,
        create_err: TransportError,
    ) -> Result<u32> {
        warn!("Failed to create folder {}: {}", name, create_err);
        match self.find(storage_id, parent_handle, name) {
            Ok(Some(handle)) => {
                info!("Folder {} exists after failed create (handle {})", name, handle);
                Ok(handle)
            }
            _ => Err(Error::Transport(create_err)),
        }
    }

    /// Find or create each folder of `components` in turn, starting at
    /// `parent_handle`. Returns the last folder's handle.
    ///
    /// # Errors
    ///
    /// Returns the first find-or-create failure.
    pub fn ensure_path<S: AsRef<str>>(
        &self,
        storage_id: u32,
        parent_handle: u32,
        components: &[S],
    ) -> Result<u32> {
        components.iter().try_fold(parent_handle, |parent, name| {
            self.find_or_create(storage_id, parent, name.as_ref())
        })
    }

    /// Find or create the music folder at the storage root.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder can neither be found nor created.
    pub fn find_or_create_music_root(&self, storage_id: u32, music_folder: &str) -> Result<u32> {
        self.find_or_create(storage_id, PARENT_ROOT, music_folder.trim_matches('/'))
    }

    /// Resolve an existing folder path by case-insensitive traversal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when a component is missing and `NotAFolder` when
    /// it names a file.
    pub fn find_path(&self, storage_id: u32, folder_path: &str) -> Result<u32> {
        logging::scoped(&self.dispatch, || {
            let mut handle = PARENT_ROOT;
            for component in split_components(&crate::path::normalize(folder_path)) {
                let children =
                    retry::children_info(self.transport, &self.listing, storage_id, handle)?;
                let mut named = children
                    .iter()
                    .filter(|info| info.filename.eq_ignore_ascii_case(component))
                    .peekable();
                let any_named = named.peek().is_some();
                handle = match named.find(|info| info.is_folder()) {
                    Some(folder) => folder.handle,
                    None if any_named => {
                        return Err(Error::Path(PathError::NotAFolder {
                            path: folder_path.to_string(),
                        }));
                    }
                    None => {
                        return Err(Error::Path(PathError::NotFound {
                            path: folder_path.to_string(),
                        }));
                    }
                };
            }
            debug!("Folder {} is handle {}", folder_path, handle);
            Ok(handle)
        })
    }
}
