//! Top-level sync operations.
//!
//! [`SyncOrchestrator`] strings the components together into the operations
//! a user actually asks for:
//! - Listing songs, playlists, and playlists with their songs
//! - Uploading a track, a directory as a playlist, or a playlist document
//! - Deleting a song, a playlist, a playlist with its songs, or a folder
//!
//! Every operation builds a fresh catalog when it needs one. Destructive
//! operations resolve their targets first (read-only), then ask the
//! [`Prompter`], and only make mutating transport calls after a yes.
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::sync::{AssumeYes, SyncOrchestrator};
//!
//! let sync = SyncOrchestrator::new(&session, config, logging::current());
//! for song in sync.list_songs(storage) {
//!     println!("{}", song.display_name);
//! }
//! sync.delete_playlist(storage, "ROAD_TRIP", &AssumeYes)?;
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{Dispatch, debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::{Catalog, CatalogEntry, CatalogScanner};
use crate::config::SyncConfig;
use crate::delete::{
    Confirmed, DeleteMethod, DeleteReport, EraseEverything, FolderDeleteConfirmation,
};
use crate::error::{
    DeleteError, Error, ErrorContext, FileSystemError, PathError, PlaylistError, Result,
    TransferError,
};
use crate::folder::FolderNavigator;
use crate::logging;
use crate::metadata::TrackPlacement;
use crate::path::{self, LogicalPath};
use crate::playlist::PlaylistDocument;
use crate::resolver::{PathResolver, Resolved};
use crate::retry::{self, with_retry};
use crate::sanitize::{sanitize_file_name, validate_playlist_name};
use crate::transfer::{TransferEngine, TransferJob, UploadReport};
use crate::transport::Transport;

// =============================================================================
// Prompting
// =============================================================================

/// Source of user confirmation.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter {
    /// Ask a yes/no question.
    fn confirm(&self, message: &str) -> bool;

    /// Ask the user to type a phrase. `None` means they declined.
    fn request_phrase(&self, message: &str) -> Option<String>;
}

/// Answers yes to ordinary confirmations and declines typed phrases, so the
/// storage and music roots are never erased unattended.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, _message: &str) -> bool {
        true
    }

    fn request_phrase(&self, _message: &str) -> Option<String> {
        None
    }
}

fn cancelled(operation: impl Into<String>) -> Error {
    Error::Playlist(PlaylistError::Cancelled {
        operation: operation.into(),
    })
}

// =============================================================================
// Results
// =============================================================================

/// A playlist on the device and the songs it lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePlaylist {
    /// The playlist object.
    pub entry: CatalogEntry,
    /// Paths listed in the playlist, in order.
    pub songs: Vec<LogicalPath>,
}

/// Playlists read from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistListing {
    /// Playlists that were read.
    pub playlists: Vec<DevicePlaylist>,
    /// Playlists whose content could not be read.
    pub unreadable: Vec<CatalogEntry>,
}

/// One uploaded track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackUpload {
    /// Local source.
    pub source: PathBuf,
    /// Device path of the track.
    pub logical_path: LogicalPath,
    /// Transfer outcome.
    pub report: UploadReport,
}

/// Outcome of uploading a directory as a playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUpload {
    /// Tracks that reached the device.
    pub tracks: Vec<TrackUpload>,
    /// Local files that failed, with the reason.
    pub failures: Vec<(PathBuf, String)>,
    /// The playlist upload, when at least one track succeeded.
    pub playlist: Option<UploadReport>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs sync operations against one device.
pub struct SyncOrchestrator<'a, T: ?Sized> {
    transport: &'a T,
    config: SyncConfig,
    dispatch: Dispatch,
}

impl<'a, T: Transport + ?Sized> SyncOrchestrator<'a, T> {
    /// Create an orchestrator over `transport`.
    pub const fn new(transport: &'a T, config: SyncConfig, dispatch: Dispatch) -> Self {
        Self {
            transport,
            config,
            dispatch,
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn scanner(&self) -> CatalogScanner<'a, T> {
        CatalogScanner::new(self.transport, self.dispatch.clone())
    }

    fn navigator(&self) -> FolderNavigator<'a, T> {
        FolderNavigator::new(self.transport, self.dispatch.clone())
            .with_listing_policy(self.config.listing_retry.policy())
    }

    fn resolver(&self) -> PathResolver<'a, T> {
        PathResolver::new(self.transport, self.dispatch.clone())
            .with_scan_roots(self.config.scan_roots.clone())
            .with_listing_policy(self.config.listing_retry.policy())
    }

    fn engine(&self) -> TransferEngine<'a, T> {
        TransferEngine::new(self.transport, self.dispatch.clone()).with_config(&self.config)
    }

    // -------------------------------------------------------------------------
    // Listing
    // -------------------------------------------------------------------------

    /// Scan the configured roots.
    pub fn catalog(&self, storage_id: u32) -> Catalog {
        self.scanner().scan(storage_id, &self.config.scan_roots)
    }

    /// Handle of the music folder, created if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder can neither be found nor created.
    pub fn music_root(&self, storage_id: u32) -> Result<u32> {
        self.navigator()
            .find_or_create_music_root(storage_id, &self.config.music_folder)
    }

    /// Audio files on the device.
    pub fn list_songs(&self, storage_id: u32) -> Vec<CatalogEntry> {
        self.catalog(storage_id).audio().to_vec()
    }

    /// Playlists on the device.
    pub fn list_playlists(&self, storage_id: u32) -> Vec<CatalogEntry> {
        self.catalog(storage_id).playlists().to_vec()
    }

    /// Read and parse one playlist.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the content cannot be read and
    /// `InvalidEncoding` when it is not UTF-8.
    pub fn read_playlist(&self, entry: &CatalogEntry) -> Result<PlaylistDocument> {
        let name = path::file_stem(&entry.file_name()).to_string();
        let bytes = with_retry(&self.config.listing_retry.policy(), |_| {
            self.transport.read_object_bytes(entry.handle)
        })
        .into_result()?;
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::Playlist(PlaylistError::InvalidEncoding { name: name.clone() }))?;
        Ok(PlaylistDocument::parse(name, &text))
    }

    /// Every playlist with the songs it lists.
    pub fn playlists_with_songs(&self, storage_id: u32) -> PlaylistListing {
        logging::scoped(&self.dispatch, || {
            let mut listing = PlaylistListing::default();
            for entry in self.catalog(storage_id).playlists() {
                match self.read_playlist(entry) {
                    Ok(doc) => listing.playlists.push(DevicePlaylist {
                        entry: entry.clone(),
                        songs: doc.paths(),
                    }),
                    Err(e) => {
                        warn!("Could not read playlist {}: {}", entry.logical_path, e);
                        listing.unreadable.push(entry.clone());
                    }
                }
            }
            listing
        })
    }

    // -------------------------------------------------------------------------
    // Uploads
    // -------------------------------------------------------------------------

    /// Upload a local MP3 to `/MUSIC/<ARTIST>/<ALBUM>/`.
    ///
    /// # Errors
    ///
    /// Returns `TooLarge` before any transport call when the file is over the
    /// limit, and folder or transfer errors otherwise.
    pub fn upload_track(&self, storage_id: u32, local_path: &Path) -> Result<TrackUpload> {
        let placement = TrackPlacement::for_file(local_path)?;
        self.upload_placed(storage_id, local_path, &placement)
    }

    fn upload_placed(
        &self,
        storage_id: u32,
        local_path: &Path,
        placement: &TrackPlacement,
    ) -> Result<TrackUpload> {
        logging::scoped(&self.dispatch, || {
            let engine = self.engine();
            let mut job = TransferJob::from_file(
                storage_id,
                0,
                placement.file_name.as_str(),
                local_path.to_path_buf(),
            )?;
            engine.precheck(&job)?;

            let logical_path = placement.logical_path(&self.config.music_folder);
            info!("Uploading {} to {}", local_path.display(), logical_path);

            let music = self.music_root(storage_id)?;
            job.target_parent = self
                .navigator()
                .ensure_path(storage_id, music, &placement.folders())?;
            let report = engine.execute(&job)?;

            Ok(TrackUpload {
                source: local_path.to_path_buf(),
                logical_path,
                report,
            })
        })
    }

    /// Upload every MP3 below `dir` and a playlist named after the directory.
    ///
    /// Files are numbered in path order. A file that fails is recorded and
    /// the rest continue. The playlist lists the tracks that made it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `dir` is not a directory, `InvalidJob` if it
    /// holds no MP3 files, and `Cancelled` if the user declines.
    pub fn upload_directory(
        &self,
        storage_id: u32,
        dir: &Path,
        prompter: &dyn Prompter,
    ) -> Result<DirectoryUpload> {
        logging::scoped(&self.dispatch, || {
            if !dir.is_dir() {
                return Err(Error::FileSystem(FileSystemError::NotFound {
                    path: dir.to_path_buf(),
                }));
            }

            let files = collect_mp3_files(dir);
            if files.is_empty() {
                return Err(Error::Transfer(TransferError::InvalidJob {
                    reason: format!("no MP3 files found in {}", dir.display()),
                }));
            }

            let dir_name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let playlist_name = sanitize_file_name(dir_name).to_uppercase();
            if !prompter.confirm(&format!(
                "Upload {} MP3 files and create playlist {}?",
                files.len(),
                playlist_name
            )) {
                return Err(cancelled("upload directory"));
            }

            let mut result = DirectoryUpload::default();
            for (index, file) in files.iter().enumerate() {
                let outcome = TrackPlacement::for_file(file).and_then(|placement| {
                    self.upload_placed(storage_id, file, &placement.with_track_number(index + 1))
                });
                match outcome {
                    Ok(track) => result.tracks.push(track),
                    Err(e) => {
                        warn!("Failed to upload {}: {}", file.display(), e);
                        result.failures.push((file.clone(), e.to_string()));
                    }
                }
            }
            info!(
                "Directory upload: {} uploaded, {} failed",
                result.tracks.len(),
                result.failures.len()
            );

            if result.tracks.is_empty() {
                warn!("No tracks uploaded, skipping playlist {}", playlist_name);
                return Ok(result);
            }

            let doc = PlaylistDocument::from_paths(
                playlist_name,
                result.tracks.iter().map(|t| t.logical_path.clone()),
            );
            match self.upload_playlist(storage_id, &doc) {
                Ok(report) => result.playlist = Some(report),
                Err(e) => {
                    warn!("Playlist {} was not uploaded: {}", doc.name(), e);
                    result.failures.push((dir.to_path_buf(), e.to_string()));
                }
            }
            Ok(result)
        })
    }

    /// Upload a new playlist to the music folder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for unusable names, `AlreadyExists` when a
    /// playlist of that name is on the device, and transfer errors otherwise.
    pub fn upload_playlist(&self, storage_id: u32, doc: &PlaylistDocument) -> Result<UploadReport> {
        logging::scoped(&self.dispatch, || {
            validate_playlist_name(doc.name())?;
            match self.catalog(storage_id).find_playlist(doc.name()) {
                Err(Error::Playlist(PlaylistError::NotFound { .. })) => {}
                Ok(_) | Err(Error::Playlist(PlaylistError::Ambiguous { .. })) => {
                    return Err(Error::Playlist(PlaylistError::AlreadyExists {
                        name: doc.name().to_string(),
                    }));
                }
                Err(e) => return Err(e),
            }

            let music = self.music_root(storage_id)?;
            self.engine()
                .upload_playlist(storage_id, music, doc, self.config.path_style)
        })
    }

    /// Upload `doc`, replacing a playlist of the same name after confirmation.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the user declines, `Ambiguous` when several
    /// playlists share the name, and delete or transfer errors otherwise.
    pub fn replace_playlist(
        &self,
        storage_id: u32,
        doc: &PlaylistDocument,
        prompter: &dyn Prompter,
    ) -> Result<UploadReport> {
        logging::scoped(&self.dispatch, || {
            validate_playlist_name(doc.name())?;
            let catalog = self.catalog(storage_id);
            match catalog.find_playlist(doc.name()) {
                Ok(existing) => {
                    if !prompter.confirm(&format!("Replace playlist {}?", existing.logical_path)) {
                        return Err(cancelled("replace playlist"));
                    }
                    self.engine()
                        .delete_object(existing.handle, Confirmed::by_user())?;
                    info!("Removed old playlist {}", existing.logical_path);
                }
                Err(Error::Playlist(PlaylistError::NotFound { .. })) => {
                    debug!("No playlist named {} yet", doc.name());
                }
                Err(e) => return Err(e),
            }

            let music = self.music_root(storage_id)?;
            self.engine()
                .upload_playlist(storage_id, music, doc, self.config.path_style)
        })
    }

    // -------------------------------------------------------------------------
    // Deletes
    // -------------------------------------------------------------------------

    /// Resolve a song path, refusing anything that is not a file.
    fn resolve_song(
        &self,
        resolver: &PathResolver<'a, T>,
        storage_id: u32,
        song_path: &LogicalPath,
    ) -> Result<Resolved> {
        let resolved = resolver.resolve_detailed(storage_id, song_path)?;
        let info = retry::object_info(
            self.transport,
            &self.config.listing_retry.policy(),
            resolved.handle,
        )
        .with_context(|| format!("inspecting {song_path}"))?;
        if info.is_folder() {
            warn!("{} is a folder, not a song", song_path);
            return Err(Error::Path(PathError::IsAFolder {
                path: song_path.to_string(),
            }));
        }
        Ok(resolved)
    }

    /// Delete the song at `song_path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it cannot be resolved, `IsAFolder` if it names a
    /// folder, `Cancelled` if the user declines, and `Failed` when the device
    /// will not delete it.
    pub fn delete_song(
        &self,
        storage_id: u32,
        song_path: &LogicalPath,
        prompter: &dyn Prompter,
    ) -> Result<DeleteMethod> {
        logging::scoped(&self.dispatch, || {
            let resolved = self.resolve_song(&self.resolver(), storage_id, song_path)?;
            let target = resolved.matched_path.as_ref().unwrap_or(song_path);
            if !prompter.confirm(&format!("Delete {target}?")) {
                return Err(cancelled("delete song"));
            }
            self.engine().delete_object(resolved.handle, Confirmed::by_user())
        })
    }

    /// Delete the playlist named `name`, keeping its songs.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Ambiguous` for the name, `Cancelled` if the
    /// user declines, and `Failed` when the device will not delete it.
    pub fn delete_playlist(
        &self,
        storage_id: u32,
        name: &str,
        prompter: &dyn Prompter,
    ) -> Result<DeleteMethod> {
        logging::scoped(&self.dispatch, || {
            let catalog = self.catalog(storage_id);
            let entry = catalog.find_playlist(name)?;
            if !prompter.confirm(&format!("Delete playlist {}?", entry.logical_path)) {
                return Err(cancelled("delete playlist"));
            }
            self.engine().delete_object(entry.handle, Confirmed::by_user())
        })
    }

    /// Delete the playlist named `name` and every song it lists.
    ///
    /// Each song is resolved again right before it is deleted. Songs that
    /// cannot be resolved or deleted are counted as failures and the rest
    /// continue; the playlist itself goes last.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Ambiguous` for the name, `Cancelled` if the user
    /// declines, and `PartialFailure` with the counts when anything failed.
    pub fn delete_playlist_and_songs(
        &self,
        storage_id: u32,
        name: &str,
        prompter: &dyn Prompter,
    ) -> Result<DeleteReport> {
        logging::scoped(&self.dispatch, || {
            let catalog = self.catalog(storage_id);
            let entry = catalog.find_playlist(name)?;
            let doc = self.read_playlist(entry)?;
            if !prompter.confirm(&format!(
                "Delete playlist {} and its {} songs?",
                entry.logical_path,
                doc.len()
            )) {
                return Err(cancelled("delete playlist and songs"));
            }

            let engine = self.engine();
            let resolver = self.resolver();
            let mut report = DeleteReport::default();

            for song in doc.paths() {
                let deleted = self
                    .resolve_song(&resolver, storage_id, &song)
                    .and_then(|resolved| {
                        engine.delete_object(resolved.handle, Confirmed::by_user())
                    });
                match deleted {
                    Ok(_) => report.files_deleted += 1,
                    Err(e) => {
                        warn!("Could not delete {}: {}", song, e);
                        report.failed_items += 1;
                    }
                }
            }

            match engine.delete_object(entry.handle, Confirmed::by_user()) {
                Ok(_) => report.files_deleted += 1,
                Err(e) => {
                    warn!("Could not delete playlist {}: {}", entry.logical_path, e);
                    report.failed_items += 1;
                }
            }

            if report.has_failures() {
                return Err(Error::Delete(DeleteError::PartialFailure {
                    target: entry.logical_path.to_string(),
                    report,
                }));
            }
            info!("Deleted playlist {} and its songs: {}", entry.logical_path, report);
            Ok(report)
        })
    }

    /// Delete a folder and its contents.
    ///
    /// The storage root and the music root require the user to type
    /// [`EraseEverything::PHRASE`]; other folders need a yes.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the user declines, `SafetyRejected` if a typed
    /// phrase does not match, and the errors of
    /// [`TransferEngine::delete_folder`].
    pub fn delete_folder(
        &self,
        storage_id: u32,
        folder_path: &str,
        prompter: &dyn Prompter,
    ) -> Result<DeleteReport> {
        logging::scoped(&self.dispatch, || {
            let engine = self.engine();
            let confirmation: FolderDeleteConfirmation = if engine.is_protected(folder_path) {
                let typed = prompter.request_phrase(&format!(
                    "This erases everything under {folder_path}. Type {} to continue:",
                    EraseEverything::PHRASE
                ));
                let Some(typed) = typed else {
                    return Err(cancelled("delete folder"));
                };
                EraseEverything::from_phrase(&typed)
                    .ok_or_else(|| {
                        Error::Delete(DeleteError::SafetyRejected {
                            path: folder_path.to_string(),
                        })
                    })?
                    .into()
            } else {
                // Look the folder up before asking.
                self.resolver().find_folder(storage_id, folder_path)?;
                let question = format!("Delete folder {folder_path} and everything in it?");
                if !prompter.confirm(&question) {
                    return Err(cancelled("delete folder"));
                }
                Confirmed::by_user().into()
            };

            engine.delete_folder(storage_id, folder_path, confirmation)
        })
    }
}

/// MP3 files below `dir`, sorted by path.
fn collect_mp3_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(path::extension)
                .is_some_and(|ext| ext == "mp3")
        })
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}
