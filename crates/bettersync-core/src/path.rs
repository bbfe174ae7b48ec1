//! Logical device paths.
//!
//! A [`LogicalPath`] is a slash-separated, device-relative path such as
//! `/Music/ARTIST/ALBUM/01_TRACK.MP3`. The raw text is kept as given so it
//! can be written back into playlists unchanged; comparison and hashing use
//! the normalized, upper-cased form.
//!
//! Normalization:
//! - trims surrounding whitespace
//! - turns `\` into `/`
//! - strips one `file:///`, `file://`, `file:`, `0:/` or `0:` prefix
//! - guarantees a leading `/` and no doubled or trailing separators

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Drive prefix some devices expect in playlist entries.
pub const DRIVE_PREFIX: &str = "0:";

const STRIPPED_PREFIXES: &[&str] = &["file:///", "file://", "file:", "0:/", "0:"];

/// Separators allowed between a numeric track prefix and the title.
const TRACK_PREFIX_SEPARATORS: &[char] = &[' ', '_', '-'];

/// A device-relative path with case-insensitive identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalPath(String);

impl LogicalPath {
    /// Wrap a raw path. The text is kept verbatim.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw text as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The normalized form, case preserved.
    #[must_use]
    pub fn normalized(&self) -> String {
        normalize(&self.0)
    }

    /// The comparison key: normalized and upper-cased.
    #[must_use]
    pub fn key(&self) -> String {
        normalize(&self.0).to_uppercase()
    }

    /// Normalized components, case preserved.
    #[must_use]
    pub fn components(&self) -> Vec<String> {
        split_components(&self.normalized())
            .map(str::to_string)
            .collect()
    }

    /// Last component, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        self.components().pop()
    }

    /// Second to last component, if any.
    #[must_use]
    pub fn parent_name(&self) -> Option<String> {
        let mut components = self.components();
        components.pop()?;
        components.pop()
    }

    /// Whether this is the storage root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.normalized() == "/"
    }

    /// Append a component.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        let base = self.normalized();
        let base = base.trim_end_matches('/');
        Self(format!("{base}/{}", name.trim_matches('/')))
    }
}

impl PartialEq for LogicalPath {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for LogicalPath {}

impl Hash for LogicalPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalPath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for LogicalPath {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

// =============================================================================
// Free helpers
// =============================================================================

/// Normalize a raw path. Case is preserved.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");

    for prefix in STRIPPED_PREFIXES {
        if path
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            path.drain(..prefix.len());
            break;
        }
    }

    let joined = split_components(&path).collect::<Vec<_>>().join("/");
    format!("/{joined}")
}

/// Non-empty `/`-separated components of `path`.
pub fn split_components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Ordered spellings of `path` tried during traversal.
///
/// Order: as given, with a leading slash, without one, with a `0:` drive
/// prefix, with a `0:/` drive prefix; then upper-cased and lower-cased forms
/// of each. Duplicates are removed keeping the first occurrence.
#[must_use]
pub fn path_variations(path: &str) -> Vec<String> {
    let trimmed = path.trim().replace('\\', "/");
    let without_slash = trimmed.trim_start_matches('/').to_string();

    let base = [
        trimmed.clone(),
        format!("/{without_slash}"),
        without_slash.clone(),
        format!("{DRIVE_PREFIX}{trimmed}"),
        format!("{DRIVE_PREFIX}/{without_slash}"),
    ];

    let mut variations: Vec<String> = Vec::with_capacity(base.len() * 3);
    let cased = base
        .iter()
        .cloned()
        .chain(base.iter().map(|v| v.to_uppercase()))
        .chain(base.iter().map(|v| v.to_lowercase()));
    for variation in cased {
        if !variations.contains(&variation) {
            variations.push(variation);
        }
    }
    variations
}

/// Lower-cased extension of a filename, without the dot.
#[must_use]
pub fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Filename without its extension.
#[must_use]
pub fn file_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => stem,
        _ => file_name,
    }
}

/// Strip a leading numeric track prefix such as `01 `, `01_` or `01-`.
///
/// The name is returned unchanged when it has no such prefix or when
/// stripping would leave nothing.
#[must_use]
pub fn strip_track_prefix(name: &str) -> &str {
    let digits = name.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return name;
    }
    let rest = &name[digits..];
    let title = rest.trim_start_matches(TRACK_PREFIX_SEPARATORS);
    if title.len() == rest.len() || title.is_empty() {
        return name;
    }
    title
}

/// Upper-cased filename with extension and track prefix removed.
#[must_use]
pub fn base_name(file_name: &str) -> String {
    strip_track_prefix(file_stem(file_name)).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_normalize_strips_prefixes_and_separators() {
        assert_eq!(normalize("0:/MUSIC/A/B.MP3"), "/MUSIC/A/B.MP3");
        assert_eq!(normalize("0:MUSIC/A"), "/MUSIC/A");
        assert_eq!(normalize("file:///Music/x.mp3"), "/Music/x.mp3");
        assert_eq!(normalize("  music\\a\\\\b.mp3 "), "/music/a/b.mp3");
        assert_eq!(normalize("/Music//A/"), "/Music/A");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("0:/"), "/");
    }

    #[test]
    fn test_logical_path_equality_ignores_case_and_prefix() {
        let a = LogicalPath::new("/Music/Artist/Track.mp3");
        let b = LogicalPath::new("0:/MUSIC/ARTIST/TRACK.MP3");
        let c = LogicalPath::new("MUSIC/ARTIST/TRACK.MP3");
        assert_eq!(a, b);
        assert_eq!(b, c);

        let set: HashSet<LogicalPath> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_logical_path_keeps_raw_text() {
        let path = LogicalPath::new("0:/Music/x.mp3");
        assert_eq!(path.as_str(), "0:/Music/x.mp3");
        assert_eq!(path.to_string(), "0:/Music/x.mp3");
    }

    #[test]
    fn test_components_and_names() {
        let path = LogicalPath::new("0:/Music/A/01 Song.mp3");
        assert_eq!(path.components(), vec!["Music", "A", "01 Song.mp3"]);
        assert_eq!(path.file_name().as_deref(), Some("01 Song.mp3"));
        assert_eq!(path.parent_name().as_deref(), Some("A"));
        assert!(LogicalPath::new("0:").is_root());
        assert_eq!(LogicalPath::new("/Music/").join("NEW"), LogicalPath::new("/MUSIC/NEW"));
    }

    #[test]
    fn test_path_variations_order() {
        let variations = path_variations("/Music/a.mp3");
        assert_eq!(variations[0], "/Music/a.mp3");
        assert_eq!(variations[1], "Music/a.mp3");
        assert_eq!(variations[2], "0:/Music/a.mp3");
        assert!(variations.contains(&"/MUSIC/A.MP3".to_string()));
        assert!(variations.contains(&"0:/music/a.mp3".to_string()));

        let unique: HashSet<&String> = variations.iter().collect();
        assert_eq!(unique.len(), variations.len());
    }

    #[test]
    fn test_strip_track_prefix() {
        assert_eq!(strip_track_prefix("01 Track.mp3"), "Track.mp3");
        assert_eq!(strip_track_prefix("01_Track.mp3"), "Track.mp3");
        assert_eq!(strip_track_prefix("01 - Track.mp3"), "Track.mp3");
        assert_eq!(strip_track_prefix("Track.mp3"), "Track.mp3");
        assert_eq!(strip_track_prefix("1999.mp3"), "1999.mp3");
        assert_eq!(strip_track_prefix("01 "), "01 ");
    }

    #[test]
    fn test_base_name_and_extension() {
        assert_eq!(base_name("01 - Hello World.MP3"), "HELLO WORLD");
        assert_eq!(extension("a.M3U8").as_deref(), Some("m3u8"));
        assert_eq!(extension("noext"), None);
        assert_eq!(extension(".hidden"), None);
        assert_eq!(file_stem("song.tar.mp3"), "song.tar");
    }
}
