//! In-memory device.
//!
//! [`MemoryTransport`] behaves like a small MTP device: a flat object store
//! with numeric handles, folders that refuse deletion while non-empty, and
//! content that is only present after `send_object_bytes`. Faults can be
//! queued per primitive to exercise retry and fallback paths, and every call
//! is counted.
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::memory::{Fault, MemoryTransport, TransportOp};
//!
//! let device = MemoryTransport::new();
//! let song = device.add_file(MemoryTransport::DEFAULT_STORAGE, "/Music/A/01 Song.mp3", b"id3");
//! device.inject_fault(Fault::new(TransportOp::DeleteObject, TransportError::Busy).times(3));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::error::{TransportError, TransportResult};
use crate::path::split_components;
use crate::transport::{DeviceObject, ObjectFormat, PARENT_ROOT, Storage, Transport};

/// Transport primitives, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOp {
    /// `list_storages`
    ListStorages,
    /// `list_children`
    ListChildren,
    /// `get_object_info`
    GetObjectInfo,
    /// `set_object_info`
    SetObjectInfo,
    /// `send_object_bytes`
    SendObjectBytes,
    /// `read_object_bytes`
    ReadObjectBytes,
    /// `delete_object`
    DeleteObject,
}

impl TransportOp {
    /// Whether the primitive changes device state.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::SetObjectInfo | Self::SendObjectBytes | Self::DeleteObject
        )
    }
}

/// A queued failure.
#[derive(Debug, Clone)]
pub struct Fault {
    op: TransportOp,
    handle: Option<u32>,
    remaining: u32,
    error: TransportError,
    after_effect: bool,
}

impl Fault {
    /// Fail the next call of `op` with `error`.
    #[must_use]
    pub const fn new(op: TransportOp, error: TransportError) -> Self {
        Self {
            op,
            handle: None,
            remaining: 1,
            error,
            after_effect: false,
        }
    }

    /// Fail `count` consecutive matching calls.
    #[must_use]
    pub const fn times(mut self, count: u32) -> Self {
        self.remaining = count;
        self
    }

    /// Only match calls targeting `handle`.
    #[must_use]
    pub const fn for_handle(mut self, handle: u32) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Apply the call's effect, then report the error anyway.
    #[must_use]
    pub const fn after_effect(mut self) -> Self {
        self.after_effect = true;
        self
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    info: DeviceObject,
    data: Vec<u8>,
}

#[derive(Debug)]
struct MemoryState {
    storages: Vec<Storage>,
    objects: BTreeMap<u32, StoredObject>,
    next_handle: u32,
    faults: Vec<Fault>,
    calls: HashMap<TransportOp, usize>,
}

impl MemoryState {
    /// Record a call and pop a matching fault, if any.
    fn enter(&mut self, op: TransportOp, handle: Option<u32>) -> Option<Fault> {
        *self.calls.entry(op).or_default() += 1;

        let index = self.faults.iter().position(|f| {
            f.op == op && f.remaining > 0 && (f.handle.is_none() || f.handle == handle)
        })?;
        let fault = self.faults[index].clone();
        self.faults[index].remaining -= 1;
        if self.faults[index].remaining == 0 {
            self.faults.remove(index);
        }
        Some(fault)
    }

    fn children(&self, storage_id: u32, parent_handle: u32) -> Vec<u32> {
        self.objects
            .values()
            .filter(|o| o.info.storage_id == storage_id && o.info.parent_handle == parent_handle)
            .map(|o| o.info.handle)
            .collect()
    }

    fn register(&mut self, storage_id: u32, parent_handle: u32, info: &DeviceObject) -> u32 {
        if info.handle != 0
            && let Some(existing) = self.objects.get_mut(&info.handle)
        {
            existing.info = DeviceObject {
                handle: info.handle,
                parent_handle,
                storage_id,
                ..info.clone()
            };
            return info.handle;
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(
            handle,
            StoredObject {
                info: DeviceObject {
                    handle,
                    parent_handle,
                    storage_id,
                    ..info.clone()
                },
                data: Vec::new(),
            },
        );
        handle
    }

    fn child_named(&self, storage_id: u32, parent_handle: u32, name: &str) -> Option<u32> {
        self.children(storage_id, parent_handle)
            .into_iter()
            .find(|h| {
                self.objects
                    .get(h)
                    .is_some_and(|o| o.info.filename.eq_ignore_ascii_case(name))
            })
    }
}

/// In-memory MTP-style device.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Storage id of the storage created by [`MemoryTransport::new`].
    pub const DEFAULT_STORAGE: u32 = 0x0001_0001;

    /// A device with one empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_storages(vec![Storage::new(Self::DEFAULT_STORAGE, "Internal Storage")])
    }

    /// A device with the given storages.
    #[must_use]
    pub fn with_storages(storages: Vec<Storage>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                storages,
                objects: BTreeMap::new(),
                next_handle: 1,
                faults: Vec::new(),
                calls: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Seeding and inspection (not counted as transport calls)
    // -------------------------------------------------------------------------

    /// Create every folder of `path`, reusing existing ones case-insensitively.
    pub fn add_folder(&self, storage_id: u32, path: &str) -> u32 {
        let mut state = self.lock();
        let mut parent = PARENT_ROOT;
        for component in split_components(path) {
            parent = match state.child_named(storage_id, parent, component) {
                Some(existing) => existing,
                None => state.register(
                    storage_id,
                    parent,
                    &DeviceObject::new_folder(storage_id, parent, component),
                ),
            };
        }
        parent
    }

    /// Create a file with content, creating parent folders as needed.
    pub fn add_file(&self, storage_id: u32, path: &str, data: &[u8]) -> u32 {
        let (folder, name) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = self.add_folder(storage_id, folder);

        let mut state = self.lock();
        let info = DeviceObject::new_file(
            storage_id,
            parent,
            name,
            ObjectFormat::for_file_name(name),
            u32::try_from(data.len()).unwrap_or(u32::MAX),
        );
        let handle = state.register(storage_id, parent, &info);
        if let Some(object) = state.objects.get_mut(&handle) {
            object.data = data.to_vec();
        }
        handle
    }

    /// Handle of the object at `path`, matched case-insensitively.
    #[must_use]
    pub fn handle_at(&self, storage_id: u32, path: &str) -> Option<u32> {
        let state = self.lock();
        let mut handle = PARENT_ROOT;
        for component in split_components(path) {
            handle = state.child_named(storage_id, handle, component)?;
        }
        Some(handle)
    }

    /// Whether `handle` exists.
    #[must_use]
    pub fn contains(&self, handle: u32) -> bool {
        self.lock().objects.contains_key(&handle)
    }

    /// Metadata of `handle`.
    #[must_use]
    pub fn object(&self, handle: u32) -> Option<DeviceObject> {
        self.lock().objects.get(&handle).map(|o| o.info.clone())
    }

    /// Content of `handle`.
    #[must_use]
    pub fn content(&self, handle: u32) -> Option<Vec<u8>> {
        self.lock().objects.get(&handle).map(|o| o.data.clone())
    }

    /// Number of objects on the device.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Queue a fault.
    pub fn inject_fault(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    /// Calls made to `op` so far.
    #[must_use]
    pub fn calls(&self, op: TransportOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Calls made to every primitive so far.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Calls made to primitives that change device state.
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| op.is_mutating())
            .map(|(_, count)| count)
            .sum()
    }
}

impl Transport for MemoryTransport {
    fn list_storages(&self) -> TransportResult<Vec<Storage>> {
        let mut state = self.lock();
        if let Some(fault) = state.enter(TransportOp::ListStorages, None) {
            return Err(fault.error);
        }
        Ok(state.storages.clone())
    }

    fn list_children(&self, storage_id: u32, parent_handle: u32) -> TransportResult<Vec<u32>> {
        let mut state = self.lock();
        if let Some(fault) = state.enter(TransportOp::ListChildren, Some(parent_handle)) {
            return Err(fault.error);
        }
        if parent_handle != PARENT_ROOT && !state.objects.contains_key(&parent_handle) {
            return Err(TransportError::NotFound {
                handle: parent_handle,
            });
        }
        Ok(state.children(storage_id, parent_handle))
    }

    fn get_object_info(&self, handle: u32) -> TransportResult<DeviceObject> {
        let mut state = self.lock();
        if let Some(fault) = state.enter(TransportOp::GetObjectInfo, Some(handle)) {
            return Err(fault.error);
        }
        state
            .objects
            .get(&handle)
            .map(|o| o.info.clone())
            .ok_or(TransportError::NotFound { handle })
    }

    fn set_object_info(
        &self,
        storage_id: u32,
        parent_handle: u32,
        info: &DeviceObject,
    ) -> TransportResult<u32> {
        let mut state = self.lock();
        let fault = state.enter(TransportOp::SetObjectInfo, Some(info.handle));
        if let Some(fault) = &fault
            && !fault.after_effect
        {
            return Err(fault.error.clone());
        }
        if !state.storages.iter().any(|s| s.id == storage_id) {
            return Err(TransportError::Protocol {
                code: 0x2008,
                message: "invalid storage id".to_string(),
            });
        }
        if parent_handle != PARENT_ROOT
            && !state
                .objects
                .get(&parent_handle)
                .is_some_and(|o| o.info.is_folder())
        {
            return Err(TransportError::Protocol {
                code: 0x201A,
                message: "invalid parent object".to_string(),
            });
        }

        let handle = state.register(storage_id, parent_handle, info);
        match fault {
            Some(fault) => Err(fault.error),
            None => Ok(handle),
        }
    }

    fn send_object_bytes(
        &self,
        handle: u32,
        data: &mut dyn Read,
        size: u64,
    ) -> TransportResult<()> {
        let mut buffer = Vec::new();
        data.take(size).read_to_end(&mut buffer)?;

        let mut state = self.lock();
        if let Some(fault) = state.enter(TransportOp::SendObjectBytes, Some(handle)) {
            return Err(fault.error);
        }
        let object = state
            .objects
            .get_mut(&handle)
            .ok_or(TransportError::NotFound { handle })?;
        object.info.size_bytes = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        object.info.modified = SystemTime::now();
        object.data = buffer;
        Ok(())
    }

    fn read_object_bytes(&self, handle: u32) -> TransportResult<Vec<u8>> {
        let mut state = self.lock();
        if let Some(fault) = state.enter(TransportOp::ReadObjectBytes, Some(handle)) {
            return Err(fault.error);
        }
        state
            .objects
            .get(&handle)
            .map(|o| o.data.clone())
            .ok_or(TransportError::NotFound { handle })
    }

    fn delete_object(&self, handle: u32) -> TransportResult<()> {
        let mut state = self.lock();
        if let Some(fault) = state.enter(TransportOp::DeleteObject, Some(handle)) {
            return Err(fault.error);
        }
        let Some(object) = state.objects.get(&handle) else {
            return Err(TransportError::NotFound { handle });
        };
        let storage_id = object.info.storage_id;
        if object.info.is_folder() && !state.children(storage_id, handle).is_empty() {
            return Err(TransportError::Protocol {
                code: 0x2023,
                message: "folder not empty".to_string(),
            });
        }
        state.objects.remove(&handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORAGE: u32 = MemoryTransport::DEFAULT_STORAGE;

    #[test]
    fn test_add_file_creates_parents_once() {
        let device = MemoryTransport::new();
        let a = device.add_file(STORAGE, "/Music/A/one.mp3", b"1");
        let b = device.add_file(STORAGE, "/MUSIC/a/two.mp3", b"22");

        let one = device.object(a).expect("one");
        let two = device.object(b).expect("two");
        assert_eq!(one.parent_handle, two.parent_handle);
        assert_eq!(two.size_bytes, 2);
        assert_eq!(device.object_count(), 4);
        assert_eq!(device.total_calls(), 0);
    }

    #[test]
    fn test_register_then_send() {
        let device = MemoryTransport::new();
        let info = DeviceObject::new_file(STORAGE, PARENT_ROOT, "X.MP3", ObjectFormat::AUDIO, 3);
        let handle = device
            .set_object_info(STORAGE, PARENT_ROOT, &info)
            .expect("register");
        assert_eq!(device.content(handle), Some(Vec::new()));

        device
            .send_object_bytes(handle, &mut &b"abcdef"[..], 3)
            .expect("send");
        assert_eq!(device.content(handle), Some(b"abc".to_vec()));
        assert_eq!(device.calls(TransportOp::SendObjectBytes), 1);
        assert_eq!(device.mutating_calls(), 2);
    }

    #[test]
    fn test_register_existing_handle_replaces_metadata() {
        let device = MemoryTransport::new();
        let handle = device.add_file(STORAGE, "/a.mp3", b"abc");
        let mut info = device.object(handle).expect("info");
        info.size_bytes = 0;

        let same = device
            .set_object_info(STORAGE, info.parent_handle, &info)
            .expect("register");
        assert_eq!(same, handle);
        assert_eq!(device.object(handle).expect("info").size_bytes, 0);
    }

    #[test]
    fn test_non_empty_folder_refuses_delete() {
        let device = MemoryTransport::new();
        device.add_file(STORAGE, "/Music/a.mp3", b"abc");
        let music = device.handle_at(STORAGE, "/music").expect("music");

        let err = device.delete_object(music).expect_err("non-empty");
        assert!(err.is_transient());
    }

    #[test]
    fn test_faults_are_consumed_in_order() {
        let device = MemoryTransport::new();
        let handle = device.add_file(STORAGE, "/a.mp3", b"abc");
        device.inject_fault(
            Fault::new(TransportOp::DeleteObject, TransportError::Busy)
                .for_handle(handle)
                .times(2),
        );

        assert_eq!(device.delete_object(handle), Err(TransportError::Busy));
        assert_eq!(device.delete_object(handle), Err(TransportError::Busy));
        assert_eq!(device.delete_object(handle), Ok(()));
        assert!(!device.contains(handle));
    }

    #[test]
    fn test_after_effect_fault_still_registers() {
        let device = MemoryTransport::new();
        device.inject_fault(
            Fault::new(TransportOp::SetObjectInfo, TransportError::Busy).after_effect(),
        );

        let folder = DeviceObject::new_folder(STORAGE, PARENT_ROOT, "MUSIC");
        assert!(device.set_object_info(STORAGE, PARENT_ROOT, &folder).is_err());
        assert!(device.handle_at(STORAGE, "/MUSIC").is_some());
    }
}
