//! Device-safe names.
//!
//! Device firmware tends to choke on punctuation in folder and file names.
//! Names derived from local files or tags are reduced to letters, digits and
//! a small set of safe symbols before they reach the device.

use crate::error::{Error, PlaylistError, Result};

/// Longest name written to the device, extension included.
pub const MAX_NAME_LEN: usize = 64;

/// Used when sanitizing leaves nothing.
pub const FALLBACK_NAME: &str = "unnamed";

const SAFE_SYMBOLS: &[char] = &['!', '_', '-', '&', '(', ')', '+', '.', '\''];

/// Sanitize a folder name.
///
/// Spaces and unsafe characters become `_`, runs of `_` collapse, and the
/// result is trimmed of `_` and capped at [`MAX_NAME_LEN`] characters.
#[must_use]
pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned = clean(name, MAX_NAME_LEN);
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// Sanitize a file name, keeping its extension intact.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem, format!(".{}", clean(ext, MAX_NAME_LEN)))
        }
        _ => (name, String::new()),
    };

    let room = MAX_NAME_LEN.saturating_sub(ext.chars().count()).max(1);
    let cleaned = clean(stem, room);
    if cleaned.is_empty() {
        format!("{FALLBACK_NAME}{ext}")
    } else {
        format!("{cleaned}{ext}")
    }
}

fn clean(name: &str, limit: usize) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        let mapped = if c.is_alphanumeric() || SAFE_SYMBOLS.contains(&c) {
            c
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed: String = out.trim_matches('_').chars().take(limit).collect();
    trimmed.trim_end_matches('_').to_string()
}

/// Validate a playlist name before it is turned into a device object.
///
/// # Errors
///
/// Returns an error if the name is empty, too long, contains path
/// separators or other reserved characters, or is a reserved device name.
pub fn validate_playlist_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::Playlist(PlaylistError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }))
    };

    if name.trim().is_empty() {
        return invalid("Playlist name cannot be empty");
    }

    if name.len() > 255 {
        return invalid("Playlist name too long");
    }

    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];
    if name.chars().any(|c| invalid_chars.contains(&c)) {
        return invalid("Playlist name contains invalid characters");
    }

    let reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved.contains(&name.trim().to_uppercase().as_str()) {
        return invalid("Playlist name is reserved");
    }

    Ok(())
}
