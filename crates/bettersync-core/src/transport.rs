//! Device transport boundary.
//!
//! This module provides:
//! - The [`Transport`] trait, the handle-based primitives an MTP-style device offers
//! - [`DeviceObject`] and [`Storage`], the records those primitives exchange
//! - [`ObjectFormat`] codes and the [`PARENT_ROOT`] handle
//! - A lazy depth-first [`TreeWalk`] built only on the primitives
//!
//! The device has no path API. Everything path-shaped in this crate is built
//! above `list_children` and `get_object_info`.

use std::collections::VecDeque;
use std::io::Read;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};
use crate::path::split_components;

/// Parent handle of objects that live at the top of a storage.
pub const PARENT_ROOT: u32 = 0;

// =============================================================================
// Object formats
// =============================================================================

/// MTP object format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectFormat(pub u16);

impl ObjectFormat {
    /// Undefined / generic object.
    pub const UNDEFINED: Self = Self(0x3000);
    /// Association (folder).
    pub const FOLDER: Self = Self(0x3001);
    /// Generic audio.
    pub const AUDIO: Self = Self(0xB901);
    /// Abstract audio playlist.
    pub const PLAYLIST: Self = Self(0xBA05);

    /// Whether this is the folder format.
    #[must_use]
    pub const fn is_folder(self) -> bool {
        self.0 == Self::FOLDER.0
    }

    /// Pick the format to register for a filename.
    #[must_use]
    pub fn for_file_name(name: &str) -> Self {
        match crate::path::extension(name).as_deref() {
            Some("mp3") => Self::AUDIO,
            Some("m3u" | "m3u8" | "pls") => Self::PLAYLIST,
            _ => Self::UNDEFINED,
        }
    }
}

impl std::fmt::Display for ObjectFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

// =============================================================================
// Records
// =============================================================================

/// A storage area exposed by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    /// Storage identifier used in every primitive.
    pub id: u32,
    /// Human readable description (e.g. "Internal Storage").
    pub description: String,
}

impl Storage {
    /// Create a storage record.
    #[must_use]
    pub fn new(id: u32, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }
}

/// One node of the device's flat object store.
///
/// Folders and files share this shape and are told apart by `format`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceObject {
    /// Object handle. Zero when registering a new object.
    pub handle: u32,
    /// Handle of the containing folder, [`PARENT_ROOT`] at the top.
    pub parent_handle: u32,
    /// Storage holding the object.
    pub storage_id: u32,
    /// Object name as stored by the device.
    pub filename: String,
    /// Object format code.
    pub format: ObjectFormat,
    /// Size as reported by the device.
    pub size_bytes: u32,
    /// Last modification time.
    pub modified: SystemTime,
}

impl DeviceObject {
    /// Describe a new file to be registered under `parent_handle`.
    #[must_use]
    pub fn new_file(
        storage_id: u32,
        parent_handle: u32,
        filename: impl Into<String>,
        format: ObjectFormat,
        size_bytes: u32,
    ) -> Self {
        Self {
            handle: 0,
            parent_handle,
            storage_id,
            filename: filename.into(),
            format,
            size_bytes,
            modified: SystemTime::now(),
        }
    }

    /// Describe a new folder to be registered under `parent_handle`.
    #[must_use]
    pub fn new_folder(storage_id: u32, parent_handle: u32, name: impl Into<String>) -> Self {
        Self::new_file(storage_id, parent_handle, name, ObjectFormat::FOLDER, 0)
    }

    /// Whether the object is a folder.
    #[must_use]
    pub const fn is_folder(&self) -> bool {
        self.format.is_folder()
    }
}

/// One item produced by [`Transport::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Object handle.
    pub handle: u32,
    /// Parent handle.
    pub parent_handle: u32,
    /// Slash-separated path built from device filenames.
    pub path: String,
    /// Whether the object is a folder.
    pub is_dir: bool,
    /// Size reported by the device.
    pub size_bytes: u32,
}

// =============================================================================
// Transport trait
// =============================================================================

/// Handle-based primitives offered by the device.
///
/// Implementations must tolerate being called from a single thread at a time;
/// [`DeviceSession`](crate::session::DeviceSession) guarantees calls never
/// overlap.
pub trait Transport: Send {
    /// Enumerate storages.
    fn list_storages(&self) -> TransportResult<Vec<Storage>>;

    /// Handles of the direct children of `parent_handle`.
    fn list_children(&self, storage_id: u32, parent_handle: u32) -> TransportResult<Vec<u32>>;

    /// Metadata of one object.
    fn get_object_info(&self, handle: u32) -> TransportResult<DeviceObject>;

    /// Register metadata. Creates a new object when `info.handle` is zero or
    /// unknown, otherwise replaces the metadata of the existing object.
    /// Returns the handle of the registered object.
    fn set_object_info(
        &self,
        storage_id: u32,
        parent_handle: u32,
        info: &DeviceObject,
    ) -> TransportResult<u32>;

    /// Stream `size` bytes of content into a registered object.
    fn send_object_bytes(&self, handle: u32, data: &mut dyn Read, size: u64)
    -> TransportResult<()>;

    /// Read the full content of an object.
    fn read_object_bytes(&self, handle: u32) -> TransportResult<Vec<u8>>;

    /// Delete one object.
    fn delete_object(&self, handle: u32) -> TransportResult<()>;

    /// Lazily walk the tree below `root_path`.
    ///
    /// The root itself is not yielded. When the root cannot be found a single
    /// error is yielded and the walk ends; errors on individual objects are
    /// yielded and the walk continues.
    fn walk<'a>(
        &'a self,
        storage_id: u32,
        root_path: &str,
        recursive: bool,
    ) -> Box<dyn Iterator<Item = TransportResult<WalkEntry>> + 'a> {
        Box::new(TreeWalk::new(self, storage_id, root_path, recursive))
    }
}

// =============================================================================
// Tree walk
// =============================================================================

enum WalkState {
    Start,
    Running,
    Done,
}

/// Depth-first iterator over a device subtree.
pub struct TreeWalk<'a, T: ?Sized> {
    transport: &'a T,
    storage_id: u32,
    root_path: String,
    recursive: bool,
    state: WalkState,
    /// Folders whose children have not been listed yet.
    folders: Vec<(u32, String)>,
    /// Listed children not yet inspected, with their parent's handle and path.
    pending: VecDeque<(u32, u32, String)>,
}

impl<'a, T: Transport + ?Sized> TreeWalk<'a, T> {
    /// Prepare a walk. No transport call happens until the first `next()`.
    pub fn new(transport: &'a T, storage_id: u32, root_path: &str, recursive: bool) -> Self {
        Self {
            transport,
            storage_id,
            root_path: root_path.to_string(),
            recursive,
            state: WalkState::Start,
            folders: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Locate the root by case-insensitive traversal from the storage top.
    fn locate_root(&self) -> TransportResult<(u32, String)> {
        let mut handle = PARENT_ROOT;
        let mut path = String::new();

        for component in split_components(&self.root_path) {
            let mut found = None;
            for child in self.transport.list_children(self.storage_id, handle)? {
                let info = self.transport.get_object_info(child)?;
                if info.is_folder() && info.filename.eq_ignore_ascii_case(component) {
                    found = Some(info);
                    break;
                }
            }
            let info = found.ok_or(TransportError::NotFound { handle })?;
            path.push('/');
            path.push_str(&info.filename);
            handle = info.handle;
        }

        Ok((handle, path))
    }
}

impl<T: Transport + ?Sized> Iterator for TreeWalk<'_, T> {
    type Item = TransportResult<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, WalkState::Start) {
            match self.locate_root() {
                Ok(root) => {
                    self.folders.push(root);
                    self.state = WalkState::Running;
                }
                Err(e) => {
                    self.state = WalkState::Done;
                    return Some(Err(e));
                }
            }
        }

        loop {
            if matches!(self.state, WalkState::Done) {
                return None;
            }

            if let Some((handle, parent_handle, parent_path)) = self.pending.pop_front() {
                let info = match self.transport.get_object_info(handle) {
                    Ok(info) => info,
                    Err(e) => return Some(Err(e)),
                };
                let path = format!("{parent_path}/{}", info.filename);
                if info.is_folder() && self.recursive {
                    self.folders.push((handle, path.clone()));
                }
                return Some(Ok(WalkEntry {
                    handle,
                    parent_handle,
                    path,
                    is_dir: info.is_folder(),
                    size_bytes: info.size_bytes,
                }));
            }

            let Some((folder, folder_path)) = self.folders.pop() else {
                self.state = WalkState::Done;
                return None;
            };
            match self.transport.list_children(self.storage_id, folder) {
                Ok(children) => self.pending.extend(
                    children
                        .into_iter()
                        .map(|child| (child, folder, folder_path.clone())),
                ),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;

    const STORAGE: u32 = MemoryTransport::DEFAULT_STORAGE;

    #[test]
    fn test_format_for_file_name() {
        assert_eq!(ObjectFormat::for_file_name("A.MP3"), ObjectFormat::AUDIO);
        assert_eq!(ObjectFormat::for_file_name("mix.m3u8"), ObjectFormat::PLAYLIST);
        assert_eq!(ObjectFormat::for_file_name("cover.jpg"), ObjectFormat::UNDEFINED);
        assert!(ObjectFormat::FOLDER.is_folder());
    }

    #[test]
    fn test_walk_recursive_yields_every_object() {
        let device = MemoryTransport::new();
        device.add_file(STORAGE, "/Music/A/B/01 Song.mp3", b"abc");
        device.add_file(STORAGE, "/Music/list.m3u8", b"#EXTM3U\n");

        let mut paths: Vec<String> = device
            .walk(STORAGE, "/music", true)
            .map(|entry| entry.expect("walk entry").path)
            .collect();
        paths.sort();

        assert_eq!(
            paths,
            vec![
                "/Music/A",
                "/Music/A/B",
                "/Music/A/B/01 Song.mp3",
                "/Music/list.m3u8",
            ]
        );
    }

    #[test]
    fn test_walk_non_recursive_stays_at_top() {
        let device = MemoryTransport::new();
        device.add_file(STORAGE, "/Music/A/B/01 Song.mp3", b"abc");
        device.add_file(STORAGE, "/Music/top.mp3", b"abc");

        let entries: Vec<WalkEntry> = device
            .walk(STORAGE, "/Music", false)
            .collect::<TransportResult<_>>()
            .expect("walk");

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.is_dir && e.path == "/Music/A"));
    }

    #[test]
    fn test_walk_missing_root_yields_single_error() {
        let device = MemoryTransport::new();
        let items: Vec<_> = device.walk(STORAGE, "/Podcasts", true).collect();

        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn test_walk_is_lazy() {
        let device = MemoryTransport::new();
        device.add_file(STORAGE, "/Music/a.mp3", b"abc");

        let walk = device.walk(STORAGE, "/Music", true);
        assert_eq!(device.total_calls(), 0);
        drop(walk);
    }
}
