//! Track metadata and device placement.
//!
//! Tracks are stored on the device as `/MUSIC/<ARTIST>/<ALBUM>/<FILE>`. The
//! artist and album come from the file's ID3 tag when present. Otherwise the
//! artist is taken from an `Artist - Title` filename and the album from the
//! containing directory, and failing that the `UNKNOWN_*` folders are used.
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::metadata::TrackPlacement;
//!
//! let placement = TrackPlacement::for_file(Path::new("Queen - Bohemian Rhapsody.mp3"))?;
//! assert_eq!(placement.artist_folder, "QUEEN");
//! ```

use std::path::Path;

use id3::{Tag, TagLike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, FileSystemError, Result};
use crate::path::{LogicalPath, file_stem};
use crate::sanitize::{sanitize_file_name, sanitize_folder_name};

/// Artist folder used when nothing better is known.
pub const UNKNOWN_ARTIST_FOLDER: &str = "UNKNOWN_ARTIST";

/// Album folder used when nothing better is known.
pub const UNKNOWN_ALBUM_FOLDER: &str = "UNKNOWN_ALBUM";

/// Tags read from a local MP3.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackTags {
    /// Track title.
    pub title: Option<String>,
    /// Track artist.
    pub artist: Option<String>,
    /// Album name.
    pub album: Option<String>,
}

impl TrackTags {
    /// Whether any tag is set.
    #[must_use]
    pub const fn has_content(&self) -> bool {
        self.title.is_some() || self.artist.is_some() || self.album.is_some()
    }
}

/// Read the ID3 tag of `path`.
///
/// Files without a tag, or with one that cannot be parsed, yield empty tags.
///
/// # Errors
///
/// Returns `NotFound` if the file does not exist.
pub fn read_tags(path: &Path) -> Result<TrackTags> {
    if !path.exists() {
        return Err(Error::FileSystem(FileSystemError::NotFound {
            path: path.to_path_buf(),
        }));
    }

    let tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => {
            debug!("No ID3 tag found in: {}", path.display());
            return Ok(TrackTags::default());
        }
        Err(e) => {
            warn!("Failed to read ID3 tag from {}: {}", path.display(), e);
            return Ok(TrackTags::default());
        }
    };

    let non_empty = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    Ok(TrackTags {
        title: non_empty(tag.title()),
        artist: non_empty(tag.artist()),
        album: non_empty(tag.album()),
    })
}

/// Artist from an `[NN ]Artist - Title` filename.
#[must_use]
pub fn artist_from_file_name(file_name: &str) -> Option<String> {
    let re = Regex::new(r"^(?:\d+\s+)?([^-]+?)\s*-\s*.+$").ok()?;
    let captures = re.captures(file_stem(file_name))?;
    let artist = captures.get(1)?.as_str().trim();
    if artist.is_empty() || artist.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(artist.to_string())
}

/// Album from the name of the directory holding `path`.
#[must_use]
pub fn album_from_directory(path: &Path) -> Option<String> {
    let dir = path.parent()?.file_name()?.to_str()?.trim();
    (!dir.is_empty()).then(|| dir.to_string())
}

/// Where a local track goes on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPlacement {
    /// Sanitized, upper-cased artist folder.
    pub artist_folder: String,
    /// Sanitized, upper-cased album folder.
    pub album_folder: String,
    /// Sanitized, upper-cased device filename.
    pub file_name: String,
}

impl TrackPlacement {
    /// Work out the placement of a local file from its tags and name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist.
    pub fn for_file(path: &Path) -> Result<Self> {
        let tags = read_tags(path)?;
        let local_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let artist_folder = tags
            .artist
            .or_else(|| artist_from_file_name(local_name))
            .map_or_else(
                || UNKNOWN_ARTIST_FOLDER.to_string(),
                |a| sanitize_folder_name(&a).to_uppercase(),
            );
        let album_folder = tags
            .album
            .or_else(|| album_from_directory(path))
            .map_or_else(
                || UNKNOWN_ALBUM_FOLDER.to_string(),
                |a| sanitize_folder_name(&a).to_uppercase(),
            );

        Ok(Self {
            artist_folder,
            album_folder,
            file_name: sanitize_file_name(local_name).to_uppercase(),
        })
    }

    /// Prefix the filename with a two-digit track number.
    #[must_use]
    pub fn with_track_number(mut self, number: usize) -> Self {
        self.file_name = format!("{number:02} {}", self.file_name);
        self
    }

    /// Folders below the music root, outermost first.
    #[must_use]
    pub fn folders(&self) -> [&str; 2] {
        [&self.artist_folder, &self.album_folder]
    }

    /// Device path of the track under `music_folder`.
    #[must_use]
    pub fn logical_path(&self, music_folder: &str) -> LogicalPath {
        LogicalPath::new(format!(
            "/{}/{}/{}/{}",
            music_folder.trim_matches('/').to_uppercase(),
            self.artist_folder,
            self.album_folder,
            self.file_name
        ))
    }
}
