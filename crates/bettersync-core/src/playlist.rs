//! Playlist codec.
//!
//! This module provides:
//! - [`PlaylistDocument`], an ordered list of `(display name, path)` entries
//! - [`encode`] / [`decode`] for the extended M3U text format
//! - [`PathStyle`], the four ways devices expect entry paths to be written
//! - [`track_display_name`], the `ARTIST - TITLE` label derived from a path
//!
//! # Format
//!
//! ```text
//! #EXTM3U
//! #EXTINF:-1,ARTIST - TITLE
//! 0:/MUSIC/ARTIST/ALBUM/TRACK.MP3
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::playlist::{encode, decode, PathStyle, PlaylistDocument};
//!
//! let doc = PlaylistDocument::from_paths("Road Trip", ["/Music/A/B/01 Song.mp3".into()]);
//! let text = encode(&doc, PathStyle::DriveUpper);
//! assert_eq!(decode(&text), doc.paths());
//! ```

use serde::{Deserialize, Serialize};

use crate::path::{self, DRIVE_PREFIX, LogicalPath, split_components};
use crate::sanitize::sanitize_folder_name;

/// First line of every playlist.
pub const PLAYLIST_HEADER: &str = "#EXTM3U";

/// Prefix of the per-entry info line.
pub const EXTINF_PREFIX: &str = "#EXTINF:";

/// Extension used for playlists written to the device.
pub const PLAYLIST_EXTENSION: &str = "m3u8";

/// Used when no artist can be derived from a path.
pub const UNKNOWN_ARTIST: &str = "UNKNOWN ARTIST";

/// Whether a filename is a playlist the scanner should index.
#[must_use]
pub fn is_playlist_file(file_name: &str) -> bool {
    matches!(
        path::extension(file_name).as_deref(),
        Some("m3u" | "m3u8" | "pls")
    )
}

// =============================================================================
// Path styles
// =============================================================================

/// How entry paths are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStyle {
    /// `0:/MUSIC/ARTIST/ALBUM/TRACK.MP3`
    #[default]
    DriveUpper,
    /// `/MUSIC/ARTIST/ALBUM/TRACK.MP3`
    RootUpper,
    /// `MUSIC/ARTIST/ALBUM/TRACK.MP3`
    Relative,
    /// `0:/Music/Artist/Album/Track.mp3`
    DrivePreserveCase,
}

impl PathStyle {
    /// Every style, in code order.
    pub const ALL: [Self; 4] = [
        Self::DriveUpper,
        Self::RootUpper,
        Self::Relative,
        Self::DrivePreserveCase,
    ];

    /// Map a numeric style code (1 to 4). Unknown codes fall back to
    /// [`PathStyle::DriveUpper`].
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            2 => Self::RootUpper,
            3 => Self::Relative,
            4 => Self::DrivePreserveCase,
            _ => Self::DriveUpper,
        }
    }

    /// Numeric style code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::DriveUpper => 1,
            Self::RootUpper => 2,
            Self::Relative => 3,
            Self::DrivePreserveCase => 4,
        }
    }

    /// Render a path in this style.
    #[must_use]
    pub fn render(self, path: &LogicalPath) -> String {
        let normalized = path.normalized();
        let relative = normalized.trim_start_matches('/');

        let rendered = match self {
            Self::DriveUpper => format!("{DRIVE_PREFIX}/{}", relative.to_uppercase()),
            Self::RootUpper => format!("/{}", relative.to_uppercase()),
            Self::Relative => relative.to_uppercase(),
            Self::DrivePreserveCase => format!("{DRIVE_PREFIX}/{relative}"),
        };
        collapse_separators(&rendered)
    }
}

impl std::fmt::Display for PathStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DriveUpper => write!(f, "0:/UPPERCASE"),
            Self::RootUpper => write!(f, "/UPPERCASE"),
            Self::Relative => write!(f, "UPPERCASE (relative)"),
            Self::DrivePreserveCase => write!(f, "0:/Original Case"),
        }
    }
}

fn collapse_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

// =============================================================================
// Document
// =============================================================================

/// One playlist line pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// Label written after `#EXTINF:-1,`.
    pub display_name: String,
    /// Referenced track.
    pub path: LogicalPath,
}

impl PlaylistEntry {
    /// Entry with a display name derived from the path.
    #[must_use]
    pub fn from_path(path: LogicalPath) -> Self {
        Self {
            display_name: track_display_name(path.as_str()).to_uppercase(),
            path,
        }
    }
}

/// A named, ordered playlist.
///
/// Entries are only ever replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistDocument {
    name: String,
    entries: Vec<PlaylistEntry>,
}

impl PlaylistDocument {
    /// An empty playlist.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// A playlist of `paths`, in order, with derived display names.
    #[must_use]
    pub fn from_paths(
        name: impl Into<String>,
        paths: impl IntoIterator<Item = LogicalPath>,
    ) -> Self {
        Self {
            name: name.into(),
            entries: paths.into_iter().map(PlaylistEntry::from_path).collect(),
        }
    }

    /// Parse playlist text, keeping `#EXTINF` labels where present.
    #[must_use]
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut entries = Vec::new();
        let mut pending_label: Option<String> = None;

        for line in text.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            if let Some(info) = line.strip_prefix(EXTINF_PREFIX) {
                pending_label = info.split_once(',').map(|(_, label)| label.trim().to_string());
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let path = LogicalPath::new(line);
            entries.push(match pending_label.take() {
                Some(display_name) if !display_name.is_empty() => PlaylistEntry {
                    display_name,
                    path,
                },
                _ => PlaylistEntry::from_path(path),
            });
        }

        Self {
            name: name.into(),
            entries,
        }
    }

    /// Playlist name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entries in order.
    #[must_use]
    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    /// Referenced paths in order.
    #[must_use]
    pub fn paths(&self) -> Vec<LogicalPath> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the playlist has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every entry.
    pub fn replace_entries(&mut self, entries: Vec<PlaylistEntry>) {
        self.entries = entries;
    }

    /// Device object name: sanitized, upper-cased, `.m3u8` extension.
    #[must_use]
    pub fn file_name(&self) -> String {
        let stem = path::file_stem(self.name.trim());
        let stem = if is_playlist_file(self.name.trim()) {
            stem
        } else {
            self.name.trim()
        };
        format!(
            "{}.{PLAYLIST_EXTENSION}",
            sanitize_folder_name(stem).to_uppercase()
        )
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Render a playlist as extended M3U text.
#[must_use]
pub fn encode(doc: &PlaylistDocument, style: PathStyle) -> String {
    let mut out = String::from(PLAYLIST_HEADER);
    out.push('\n');
    for entry in &doc.entries {
        out.push_str(EXTINF_PREFIX);
        out.push_str("-1,");
        out.push_str(&entry.display_name);
        out.push('\n');
        out.push_str(&style.render(&entry.path));
        out.push('\n');
    }
    out
}

/// Extract the track paths of playlist text, verbatim and in order.
///
/// Blank lines and `#` lines are skipped.
#[must_use]
pub fn decode(text: &str) -> Vec<LogicalPath> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(LogicalPath::new)
        .collect()
}

/// Derive an `ARTIST - TITLE` label from a track path.
///
/// The title is the filename without extension, underscores as spaces. The
/// artist is the folder following a `Music` folder when there is one, else
/// the part of the title before the first `" - "`, else
/// [`UNKNOWN_ARTIST`].
#[must_use]
pub fn track_display_name(track_path: &str) -> String {
    let normalized = track_path.replace('\\', "/");
    let components: Vec<&str> = split_components(&normalized).collect();
    let file_name = components.last().copied().unwrap_or_default();
    let title = path::file_stem(file_name).replace('_', " ");

    let music_artist = components
        .iter()
        .enumerate()
        .take(components.len().saturating_sub(2))
        .find(|(_, c)| c.eq_ignore_ascii_case("music"))
        .map(|(i, _)| components[i + 1].replace('_', " "));

    if let Some(artist) = music_artist {
        return format!("{artist} - {title}");
    }

    if let Some((artist, song)) = title.split_once(" - ") {
        return format!("{} - {}", artist.trim(), song.trim());
    }

    format!("{UNKNOWN_ARTIST} - {title}")
}
