//! Device sessions with bounded acquisition.
//!
//! Opening a device and enumerating its storages are blocking calls that can
//! hang on a misbehaving device. Both run on tokio's blocking pool and are
//! raced against a timeout. On timeout the blocking call is left to finish on
//! its own and its result is dropped.
//!
//! A [`DeviceSession`] is itself a [`Transport`]: every call takes the session
//! lock, so one session serializes all operations against its device.
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::session::{DeviceSession, select_storage};
//!
//! let session =
//!     DeviceSession::open(connector, config.session_timeout(), logging::current()).await?;
//! let storages = session.storages(config.storage_timeout()).await?;
//! let storage = select_storage(&storages, None)?;
//! ```

use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{Dispatch, debug, info, warn};

use crate::error::{DeviceError, Error, Result, TransportResult};
use crate::logging;
use crate::transport::{DeviceObject, Storage, Transport};

/// Opens transports to a physical device.
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by a successful open.
    type Transport: Transport + 'static;

    /// Open the device. May block.
    ///
    /// # Errors
    ///
    /// Returns the transport error reported by the device.
    fn open(&self) -> TransportResult<Self::Transport>;
}

/// An open device, shared behind a lock.
pub struct DeviceSession<T> {
    transport: Arc<Mutex<T>>,
    dispatch: Dispatch,
}

impl<T> Clone for DeviceSession<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<T: Transport + 'static> DeviceSession<T> {
    /// Wrap an already open transport.
    pub fn from_transport(transport: T, dispatch: Dispatch) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            dispatch,
        }
    }

    /// Open a session through `connector`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the open does not finish in time,
    /// `ConnectFailed` when the device refuses, and `TaskFailed` when the
    /// blocking task panics.
    pub async fn open<C>(connector: Arc<C>, timeout: Duration, dispatch: Dispatch) -> Result<Self>
    where
        C: Connector<Transport = T>,
    {
        logging::scoped(&dispatch, || debug!("Opening device session (timeout {:?})", timeout));

        let task = tokio::task::spawn_blocking(move || connector.open());
        let transport = match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                logging::scoped(&dispatch, || {
                    warn!("Device session did not open within {:?}", timeout);
                });
                return Err(Error::Device(DeviceError::Timeout {
                    operation: "open session".to_string(),
                    timeout,
                }));
            }
            Ok(Err(join_err)) => {
                return Err(Error::Device(DeviceError::TaskFailed {
                    reason: join_err.to_string(),
                }));
            }
            Ok(Ok(Err(e))) => {
                return Err(Error::Device(DeviceError::ConnectFailed {
                    reason: e.to_string(),
                }));
            }
            Ok(Ok(Ok(transport))) => transport,
        };

        logging::scoped(&dispatch, || info!("Device session opened"));
        Ok(Self::from_transport(transport, dispatch))
    }

    /// Enumerate storages, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when enumeration does not finish in time, `NoStorage`
    /// when the device reports none, and the transport error otherwise.
    pub async fn storages(&self, timeout: Duration) -> Result<Vec<Storage>> {
        let shared = Arc::clone(&self.transport);
        let task = tokio::task::spawn_blocking(move || {
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .list_storages()
        });

        let storages = match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                return Err(Error::Device(DeviceError::Timeout {
                    operation: "list storages".to_string(),
                    timeout,
                }));
            }
            Ok(Err(join_err)) => {
                return Err(Error::Device(DeviceError::TaskFailed {
                    reason: join_err.to_string(),
                }));
            }
            Ok(Ok(result)) => result?,
        };

        if storages.is_empty() {
            return Err(Error::Device(DeviceError::NoStorage));
        }
        logging::scoped(&self.dispatch, || {
            debug!("Device reports {} storages", storages.len());
        });
        Ok(storages)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Choose a storage id.
///
/// A single storage is chosen automatically. With several, `preferred`
/// must name one of them.
///
/// # Errors
///
/// Returns `NoStorage`, `StorageNotFound` or `AmbiguousStorage`.
pub fn select_storage(storages: &[Storage], preferred: Option<u32>) -> Result<u32> {
    match (storages, preferred) {
        ([], _) => Err(Error::Device(DeviceError::NoStorage)),
        (_, Some(id)) => storages
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.id)
            .ok_or(Error::Device(DeviceError::StorageNotFound { storage_id: id })),
        ([only], None) => Ok(only.id),
        (many, None) => Err(Error::Device(DeviceError::AmbiguousStorage {
            count: many.len(),
        })),
    }
}

impl<T: Transport + 'static> Transport for DeviceSession<T> {
    fn list_storages(&self) -> TransportResult<Vec<Storage>> {
        self.lock().list_storages()
    }

    fn list_children(&self, storage_id: u32, parent_handle: u32) -> TransportResult<Vec<u32>> {
        self.lock().list_children(storage_id, parent_handle)
    }

    fn get_object_info(&self, handle: u32) -> TransportResult<DeviceObject> {
        self.lock().get_object_info(handle)
    }

    fn set_object_info(
        &self,
        storage_id: u32,
        parent_handle: u32,
        info: &DeviceObject,
    ) -> TransportResult<u32> {
        self.lock().set_object_info(storage_id, parent_handle, info)
    }

    fn send_object_bytes(
        &self,
        handle: u32,
        data: &mut dyn Read,
        size: u64,
    ) -> TransportResult<()> {
        self.lock().send_object_bytes(handle, data, size)
    }

    fn read_object_bytes(&self, handle: u32) -> TransportResult<Vec<u8>> {
        self.lock().read_object_bytes(handle)
    }

    fn delete_object(&self, handle: u32) -> TransportResult<()> {
        self.lock().delete_object(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransportError};
    use crate::memory::{Fault, MemoryTransport, TransportOp};

    struct MemoryConnector {
        delay: Duration,
        refuse: bool,
    }

    impl Connector for MemoryConnector {
        type Transport = MemoryTransport;

        fn open(&self) -> TransportResult<MemoryTransport> {
            std::thread::sleep(self.delay);
            if self.refuse {
                return Err(TransportError::Disconnected);
            }
            let device = MemoryTransport::new();
            device.add_file(MemoryTransport::DEFAULT_STORAGE, "/Music/a.mp3", b"data");
            Ok(device)
        }
    }

    fn connector(delay_ms: u64, refuse: bool) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector {
            delay: Duration::from_millis(delay_ms),
            refuse,
        })
    }

    #[tokio::test]
    async fn test_open_and_list_storages() {
        let session =
            DeviceSession::open(connector(0, false), Duration::from_secs(5), logging::disabled())
                .await
                .expect("open");
        let storages = session.storages(Duration::from_secs(5)).await.expect("storages");
        assert_eq!(storages.len(), 1);

        let storage = select_storage(&storages, None).expect("select");
        assert_eq!(storage, MemoryTransport::DEFAULT_STORAGE);
        assert_eq!(session.list_children(storage, 0).expect("children").len(), 1);
    }

    #[tokio::test]
    async fn test_open_times_out() {
        let err = DeviceSession::open(
            connector(500, false),
            Duration::from_millis(20),
            logging::disabled(),
        )
        .await
            .err()
            .expect("should time out");
        assert!(matches!(err, Error::Device(DeviceError::Timeout { .. })));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_open_refused() {
        let err =
            DeviceSession::open(connector(0, true), Duration::from_secs(5), logging::disabled())
                .await
            .err()
            .expect("should fail");
        assert!(matches!(err, Error::Device(DeviceError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_empty_storage_list() {
        let session = DeviceSession::from_transport(
            MemoryTransport::with_storages(Vec::new()),
            logging::disabled(),
        );
        let err = session
            .storages(Duration::from_secs(5))
            .await
            .expect_err("no storage");
        assert!(matches!(err, Error::Device(DeviceError::NoStorage)));
    }

    #[tokio::test]
    async fn test_storage_listing_error_propagates() {
        let device = MemoryTransport::new();
        device.inject_fault(Fault::new(TransportOp::ListStorages, TransportError::Disconnected));
        let session = DeviceSession::from_transport(device, logging::disabled());

        let err = session.storages(Duration::from_secs(5)).await.expect_err("disconnected");
        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
    }

    #[test]
    fn test_select_storage() {
        let storages = vec![Storage::new(1, "Internal"), Storage::new(2, "SD card")];
        assert!(matches!(
            select_storage(&storages, None),
            Err(Error::Device(DeviceError::AmbiguousStorage { count: 2 }))
        ));
        assert_eq!(select_storage(&storages, Some(2)).expect("preferred"), 2);
        assert!(matches!(
            select_storage(&storages, Some(9)),
            Err(Error::Device(DeviceError::StorageNotFound { storage_id: 9 }))
        ));
        assert!(matches!(
            select_storage(&[], None),
            Err(Error::Device(DeviceError::NoStorage))
        ));
    }
}
