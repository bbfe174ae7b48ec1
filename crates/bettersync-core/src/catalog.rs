//! Catalog scanning.
//!
//! The scanner walks the device tree below each configured root and builds a
//! one-shot index of audio files and playlists. A catalog reflects the device
//! at the moment of the scan only; it is rebuilt for every top-level
//! operation and never persisted.
//!
//! Zero-byte audio objects are what an interrupted upload leaves behind. They
//! are kept apart from valid audio and only reported in its place when the
//! device has no valid audio at all, so callers can tell "empty device" from
//! "every upload failed".

use serde::{Deserialize, Serialize};
use tracing::{Dispatch, debug, info, warn};

use crate::error::{Error, PlaylistError, Result};
use crate::logging;
use crate::path::{self, LogicalPath};
use crate::playlist::{is_playlist_file, track_display_name};
use crate::transport::{Transport, WalkEntry};

/// Classification of a non-folder object by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// `.mp3`
    Audio,
    /// `.m3u`, `.m3u8`, `.pls`
    Playlist,
    /// Anything else.
    Other,
}

impl ObjectClass {
    /// Classify a filename.
    #[must_use]
    pub fn of(file_name: &str) -> Self {
        if is_playlist_file(file_name) {
            Self::Playlist
        } else if path::extension(file_name).as_deref() == Some("mp3") {
            Self::Audio
        } else {
            Self::Other
        }
    }
}

/// One indexed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Path built from device filenames.
    pub logical_path: LogicalPath,
    /// Object handle at scan time.
    pub handle: u32,
    /// Storage holding the object.
    pub storage_id: u32,
    /// Containing folder.
    pub parent_handle: u32,
    /// `ARTIST - TITLE` label.
    pub display_name: String,
    /// Size reported by the device.
    pub size_bytes: u32,
}

impl CatalogEntry {
    fn from_walk(storage_id: u32, entry: WalkEntry) -> Self {
        Self {
            display_name: track_display_name(&entry.path),
            logical_path: LogicalPath::new(entry.path),
            handle: entry.handle,
            storage_id,
            parent_handle: entry.parent_handle,
            size_bytes: entry.size_bytes,
        }
    }

    /// Device filename.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.logical_path.file_name().unwrap_or_default()
    }
}

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    audio: Vec<CatalogEntry>,
    empty_audio: Vec<CatalogEntry>,
    playlists: Vec<CatalogEntry>,
    walk_errors: usize,
}

impl Catalog {
    /// Audio to present: valid files, or the empty ones when no valid file
    /// exists.
    #[must_use]
    pub fn audio(&self) -> &[CatalogEntry] {
        if self.audio.is_empty() {
            &self.empty_audio
        } else {
            &self.audio
        }
    }

    /// Audio files with content.
    #[must_use]
    pub fn valid_audio(&self) -> &[CatalogEntry] {
        &self.audio
    }

    /// Zero-byte audio files.
    #[must_use]
    pub fn empty_audio(&self) -> &[CatalogEntry] {
        &self.empty_audio
    }

    /// Playlists.
    #[must_use]
    pub fn playlists(&self) -> &[CatalogEntry] {
        &self.playlists
    }

    /// Every audio file found is zero bytes, which points at failed uploads.
    #[must_use]
    pub fn failed_uploads_only(&self) -> bool {
        self.audio.is_empty() && !self.empty_audio.is_empty()
    }

    /// Errors seen while walking.
    #[must_use]
    pub const fn walk_errors(&self) -> usize {
        self.walk_errors
    }

    /// Find a playlist by name, with or without extension, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches and `Ambiguous` when more than
    /// one playlist matches.
    pub fn find_playlist(&self, name: &str) -> Result<&CatalogEntry> {
        let wanted = name.trim();
        let matches: Vec<&CatalogEntry> = self
            .playlists
            .iter()
            .filter(|entry| {
                let file_name = entry.file_name();
                file_name.eq_ignore_ascii_case(wanted)
                    || path::file_stem(&file_name).eq_ignore_ascii_case(wanted)
            })
            .collect();

        match matches.as_slice() {
            [] => Err(Error::Playlist(PlaylistError::NotFound {
                name: wanted.to_string(),
            })),
            [entry] => Ok(entry),
            many => Err(Error::Playlist(PlaylistError::Ambiguous {
                name: wanted.to_string(),
                count: many.len(),
            })),
        }
    }
}

/// Builds [`Catalog`]s from the device tree.
pub struct CatalogScanner<'a, T: ?Sized> {
    transport: &'a T,
    dispatch: Dispatch,
}

impl<'a, T: Transport + ?Sized> CatalogScanner<'a, T> {
    /// Create a scanner logging through `dispatch`.
    pub const fn new(transport: &'a T, dispatch: Dispatch) -> Self {
        Self {
            transport,
            dispatch,
        }
    }

    /// Walk every root and index what is found.
    ///
    /// A root that cannot be walked is logged and skipped.
    pub fn scan<S: AsRef<str>>(&self, storage_id: u32, roots: &[S]) -> Catalog {
        logging::scoped(&self.dispatch, || {
            let mut catalog = Catalog::default();

            for root in roots {
                let root = root.as_ref();
                debug!("Scanning {} on storage {:#010x}", root, storage_id);
                for item in self.transport.walk(storage_id, root, true) {
                    let entry = match item {
                        Ok(entry) => entry,
                        Err(e) => {
                            warn!("Error while scanning {}: {}", root, e);
                            catalog.walk_errors += 1;
                            continue;
                        }
                    };
                    if entry.is_dir {
                        continue;
                    }
                    Self::index(&mut catalog, storage_id, entry);
                }
            }

            if catalog.failed_uploads_only() {
                warn!(
                    "Found {} audio files but all are empty; previous uploads likely failed",
                    catalog.empty_audio.len()
                );
            }
            info!(
                "Catalog: {} audio, {} empty audio, {} playlists",
                catalog.audio.len(),
                catalog.empty_audio.len(),
                catalog.playlists.len()
            );
            catalog
        })
    }

    fn index(catalog: &mut Catalog, storage_id: u32, entry: WalkEntry) {
        let file_name = entry.path.rsplit('/').next().unwrap_or_default().to_string();
        match ObjectClass::of(&file_name) {
            ObjectClass::Audio if entry.size_bytes == 0 => {
                debug!("Empty audio file: {}", entry.path);
                catalog
                    .empty_audio
                    .push(CatalogEntry::from_walk(storage_id, entry));
            }
            ObjectClass::Audio => catalog.audio.push(CatalogEntry::from_walk(storage_id, entry)),
            ObjectClass::Playlist => catalog
                .playlists
                .push(CatalogEntry::from_walk(storage_id, entry)),
            ObjectClass::Other => {}
        }
    }
}
