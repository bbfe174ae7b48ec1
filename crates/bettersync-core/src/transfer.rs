//! Transfer engine for pushing files onto the device.
//!
//! This module provides:
//! - Size-limited uploads ([`TransferEngine::upload`], [`TransferEngine::execute`])
//! - A send ladder: fresh reader, immediate retry, delayed retry, and a
//!   truncated partial send for large payloads as a last resort
//! - Post-send verification by re-reading the object's metadata
//! - Playlist uploads ([`TransferEngine::upload_playlist`])
//!
//! Deletion lives in [`crate::delete`] and shares this engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::{logging, transfer::TransferEngine};
//!
//! let engine = TransferEngine::new(&session, logging::current());
//! let size = bytes.len() as u64;
//! let report = engine.upload(storage_id, album_handle, "01_SONG.MP3", &bytes, size)?;
//! if report.status.is_degraded() {
//!     println!("Only part of the file reached the device");
//! }
//! ```

use std::borrow::Cow;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{Dispatch, debug, error, info, warn};

use crate::config::{SyncConfig, TransferConfig};
use crate::error::{Error, Result, TransferError};
use crate::logging;
use crate::playlist::{PathStyle, PlaylistDocument, encode};
use crate::retry::{self, RetryOutcome, RetryPolicy, with_retry};
use crate::transport::{DeviceObject, ObjectFormat, Transport};

// =============================================================================
// Jobs and reports
// =============================================================================

/// Where the payload comes from.
#[derive(Debug, Clone)]
pub enum TransferSource<'b> {
    /// In-memory bytes.
    Bytes(&'b [u8]),
    /// A local file, read only after the size check passes.
    File(PathBuf),
}

/// One upload, alive for the duration of the transfer and its retries.
#[derive(Debug, Clone)]
pub struct TransferJob<'b> {
    /// Payload source.
    pub source: TransferSource<'b>,
    /// Target storage.
    pub storage_id: u32,
    /// Folder receiving the object.
    pub target_parent: u32,
    /// Object name on the device.
    pub target_filename: String,
    /// Size the device should report after the send.
    pub expected_size: u64,
    /// Format code to register.
    pub format: ObjectFormat,
}

impl<'b> TransferJob<'b> {
    /// Job for in-memory bytes.
    #[must_use]
    pub fn from_bytes(
        storage_id: u32,
        target_parent: u32,
        target_filename: impl Into<String>,
        bytes: &'b [u8],
    ) -> Self {
        let target_filename = target_filename.into();
        Self {
            format: ObjectFormat::for_file_name(&target_filename),
            source: TransferSource::Bytes(bytes),
            storage_id,
            target_parent,
            target_filename,
            expected_size: bytes.len() as u64,
        }
    }

    /// Job for a local file. The file's current size becomes the expected size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn from_file(
        storage_id: u32,
        target_parent: u32,
        target_filename: impl Into<String>,
        path: PathBuf,
    ) -> Result<Self> {
        let metadata = fs::metadata(&path).map_err(|e| {
            Error::Transfer(TransferError::SourceUnreadable {
                path: path.clone(),
                reason: e.to_string(),
            })
        })?;
        let target_filename = target_filename.into();
        Ok(Self {
            format: ObjectFormat::for_file_name(&target_filename),
            source: TransferSource::File(path),
            storage_id,
            target_parent,
            target_filename,
            expected_size: metadata.len(),
        })
    }

    /// Override the registered format.
    #[must_use]
    pub const fn with_format(mut self, format: ObjectFormat) -> Self {
        self.format = format;
        self
    }
}

/// How much of the payload reached the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    /// The full payload was sent.
    Complete,
    /// Only the first `sent` of `total` bytes were sent.
    Degraded {
        /// Bytes sent.
        sent: u64,
        /// Payload size.
        total: u64,
    },
}

impl UploadStatus {
    /// Whether only part of the payload was sent.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Outcome of the post-send metadata check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verification {
    /// Reported size matches the expected size.
    Verified,
    /// The object exists but its reported size differs.
    SizeMismatch {
        /// Expected size.
        expected: u64,
        /// Size reported by the device.
        reported: u64,
    },
    /// The object could not be read back.
    Unverified {
        /// Why verification failed.
        reason: String,
    },
    /// Verification is disabled.
    Skipped,
}

/// Result of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    /// Handle of the uploaded object.
    pub handle: u32,
    /// Object name on the device.
    pub filename: String,
    /// Bytes handed to the transport.
    pub bytes_sent: u64,
    /// Full payload size.
    pub total_bytes: u64,
    /// Send attempts, including a partial send.
    pub attempts: u32,
    /// Complete or degraded.
    pub status: UploadStatus,
    /// Post-send check result.
    pub verification: Verification,
}

// =============================================================================
// Transfer Engine
// =============================================================================

/// Uploads and deletes device objects with retries and verification.
pub struct TransferEngine<'a, T: ?Sized> {
    pub(crate) transport: &'a T,
    pub(crate) dispatch: Dispatch,
    pub(crate) settings: TransferConfig,
    pub(crate) delete_policy: RetryPolicy,
    pub(crate) listing: RetryPolicy,
    pub(crate) music_root: String,
}

impl<'a, T: Transport + ?Sized> TransferEngine<'a, T> {
    /// Create an engine with default limits and timings.
    pub fn new(transport: &'a T, dispatch: Dispatch) -> Self {
        Self {
            transport,
            dispatch,
            settings: TransferConfig::default(),
            delete_policy: RetryPolicy::new(3, Duration::from_millis(500)),
            listing: RetryPolicy::new(3, Duration::from_millis(100)),
            music_root: "/Music".to_string(),
        }
    }

    /// Apply limits, timings and the music root from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.settings = config.transfer.clone();
        self.delete_policy = config.delete_retry.policy();
        self.listing = config.listing_retry.policy();
        self.music_root = config.music_root_path();
        self
    }

    /// Replace the upload settings.
    #[must_use]
    pub fn with_transfer_config(mut self, settings: TransferConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the delete retry policy.
    #[must_use]
    pub const fn with_delete_policy(mut self, policy: RetryPolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Replace the listing retry policy.
    #[must_use]
    pub const fn with_listing_policy(mut self, policy: RetryPolicy) -> Self {
        self.listing = policy;
        self
    }

    /// Upload settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &TransferConfig {
        &self.settings
    }

    /// Upload `bytes` as `filename` under `parent_handle`.
    ///
    /// # Errors
    ///
    /// Returns `TooLarge` before any transport call when the payload is over
    /// the limit, `RegisterFailed` or `SendFailed` when the device does not
    /// accept the object.
    pub fn upload(
        &self,
        storage_id: u32,
        parent_handle: u32,
        filename: &str,
        bytes: &[u8],
        expected_size: u64,
    ) -> Result<UploadReport> {
        let mut job = TransferJob::from_bytes(storage_id, parent_handle, filename, bytes);
        job.expected_size = expected_size;
        self.execute(&job)
    }

    /// Encode `doc` and upload it under `parent_handle`.
    ///
    /// # Errors
    ///
    /// Same as [`TransferEngine::upload`].
    pub fn upload_playlist(
        &self,
        storage_id: u32,
        parent_handle: u32,
        doc: &PlaylistDocument,
        style: PathStyle,
    ) -> Result<UploadReport> {
        let text = encode(doc, style);
        debug!(
            "Encoded playlist {} ({} entries, style {})",
            doc.name(),
            doc.len(),
            style.code()
        );
        let job =
            TransferJob::from_bytes(storage_id, parent_handle, doc.file_name(), text.as_bytes())
                .with_format(ObjectFormat::PLAYLIST);
        self.execute(&job)
    }

    /// Run one transfer job.
    ///
    /// # Errors
    ///
    /// Same as [`TransferEngine::upload`].
    pub fn execute(&self, job: &TransferJob<'_>) -> Result<UploadReport> {
        logging::scoped(&self.dispatch, || {
            self.precheck(job)?;
            let filename = job.target_filename.trim();
            let payload = self.load(job)?;
            let total = payload.len() as u64;
            self.check_size(filename, total)?;

            let handle = self.register(job, filename, total)?;
            let (status, attempts) = self.send(handle, filename, &payload)?;
            let verification = if self.settings.verify_after_send {
                self.verify(job, handle, filename)
            } else {
                Verification::Skipped
            };

            let bytes_sent = match status {
                UploadStatus::Complete => total,
                UploadStatus::Degraded { sent, .. } => sent,
            };
            info!(
                "Uploaded {} (handle {}, {} of {} bytes, {} attempts)",
                filename, handle, bytes_sent, total, attempts
            );

            Ok(UploadReport {
                handle,
                filename: filename.to_string(),
                bytes_sent,
                total_bytes: total,
                attempts,
                status,
                verification,
            })
        })
    }

    /// Reject a job with a bad filename or an expected size over the limit.
    /// Makes no transport call.
    ///
    /// # Errors
    ///
    /// Returns `InvalidJob` or `TooLarge`.
    pub fn precheck(&self, job: &TransferJob<'_>) -> Result<()> {
        let filename = job.target_filename.trim();
        if filename.is_empty() || filename.contains('/') {
            return Err(Error::Transfer(TransferError::InvalidJob {
                reason: format!("invalid target filename '{}'", job.target_filename),
            }));
        }
        self.check_size(filename, job.expected_size)
    }

    fn check_size(&self, filename: &str, size: u64) -> Result<()> {
        if size > self.settings.max_upload_bytes {
            warn!(
                "Rejecting {}: {} bytes exceeds {} byte limit",
                filename, size, self.settings.max_upload_bytes
            );
            return Err(Error::Transfer(TransferError::TooLarge {
                filename: filename.to_string(),
                size,
                limit: self.settings.max_upload_bytes,
            }));
        }
        Ok(())
    }

    fn load<'j>(&self, job: &'j TransferJob<'_>) -> Result<Cow<'j, [u8]>> {
        match &job.source {
            TransferSource::Bytes(bytes) => Ok(Cow::Borrowed(*bytes)),
            TransferSource::File(path) => fs::read(path).map(Cow::Owned).map_err(|e| {
                Error::Transfer(TransferError::SourceUnreadable {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            }),
        }
    }

    fn register(&self, job: &TransferJob<'_>, filename: &str, total: u64) -> Result<u32> {
        let info = DeviceObject::new_file(
            job.storage_id,
            job.target_parent,
            filename,
            job.format,
            u32::try_from(total).unwrap_or(u32::MAX),
        );
        let outcome = with_retry(&self.settings.register_policy(), |attempt| {
            if attempt > 1
                && let Some(existing) = self.find_registered(job, filename)
            {
                return Ok(existing);
            }
            debug!("Registering {} (attempt {})", filename, attempt);
            self.transport.set_object_info(job.storage_id, job.target_parent, &info)
        });
        match outcome {
            RetryOutcome::Success { value, .. } | RetryOutcome::Degraded { value, .. } => Ok(value),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                if let Some(existing) = self.find_registered(job, filename) {
                    warn!(
                        "Register of {} reported {} but the object exists (handle {})",
                        filename, last_error, existing
                    );
                    return Ok(existing);
                }
                error!("Failed to register {}: {}", filename, last_error);
                Err(Error::Transfer(TransferError::RegisterFailed {
                    filename: filename.to_string(),
                    attempts,
                    source: last_error,
                }))
            }
        }
    }

    /// File named `filename` under the job's parent, left behind by a
    /// register call that failed after the device created the object.
    fn find_registered(&self, job: &TransferJob<'_>, filename: &str) -> Option<u32> {
        let children =
            retry::children_info(self.transport, &self.listing, job.storage_id, job.target_parent)
                .ok()?;
        let existing = children
            .into_iter()
            .find(|info| !info.is_folder() && info.filename.eq_ignore_ascii_case(filename))?;
        info!(
            "{} already registered by an earlier attempt (handle {})",
            filename, existing.handle
        );
        Some(existing.handle)
    }

    /// Full sends with a fresh reader each time, then a partial send for
    /// payloads above the partial threshold.
    fn send(&self, handle: u32, filename: &str, payload: &[u8]) -> Result<(UploadStatus, u32)> {
        let total = payload.len() as u64;
        let outcome = with_retry(&self.settings.send_policy(), |attempt| {
            debug!("Sending {} bytes of {} (attempt {})", total, filename, attempt);
            let mut reader = Cursor::new(payload);
            self.transport.send_object_bytes(handle, &mut reader, total)
        });

        let partial = self.settings.partial_transfer_bytes;
        let outcome = if total > partial {
            outcome.or_degraded(|e| {
                warn!(
                    "Full send of {} failed ({}), sending first {} bytes",
                    filename, e, partial
                );
                let head = &payload[..usize::try_from(partial).unwrap_or(payload.len())];
                let mut reader = Cursor::new(head);
                self.transport.send_object_bytes(handle, &mut reader, partial)
            })
        } else {
            outcome
        };

        match outcome {
            RetryOutcome::Success { attempts, .. } => Ok((UploadStatus::Complete, attempts)),
            RetryOutcome::Degraded { attempts, .. } => {
                warn!("{} was only partially sent ({} of {} bytes)", filename, partial, total);
                Ok((
                    UploadStatus::Degraded {
                        sent: partial,
                        total,
                    },
                    attempts,
                ))
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                error!("All send methods failed for {}: {}", filename, last_error);
                Err(Error::Transfer(TransferError::SendFailed {
                    filename: filename.to_string(),
                    handle,
                    attempts,
                    source: last_error,
                }))
            }
        }
    }

    /// Compare the reported size with the expected one. Never fails.
    fn verify(&self, job: &TransferJob<'_>, handle: u32, filename: &str) -> Verification {
        let info = match retry::object_info(self.transport, &self.listing, handle) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Could not read back {} by handle: {}", filename, e);
                let siblings = retry::children_info(
                    self.transport,
                    &self.listing,
                    job.storage_id,
                    job.target_parent,
                );
                siblings.ok().and_then(|children| {
                    children
                        .into_iter()
                        .find(|c| !c.is_folder() && c.filename.eq_ignore_ascii_case(filename))
                })
            }
        };

        let Some(info) = info else {
            return Verification::Unverified {
                reason: format!("{filename} not found after upload"),
            };
        };

        let reported = u64::from(info.size_bytes);
        if reported == job.expected_size {
            debug!("Verified {} ({} bytes)", filename, reported);
            Verification::Verified
        } else {
            warn!(
                "Size mismatch for {}: expected {} bytes, device reports {}",
                filename, job.expected_size, reported
            );
            Verification::SizeMismatch {
                expected: job.expected_size,
                reported,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransportError};
    use crate::memory::{Fault, MemoryTransport, TransportOp};
    use crate::path::LogicalPath;
    use crate::transport::PARENT_ROOT;
    use tempfile::TempDir;

    const STORAGE: u32 = MemoryTransport::DEFAULT_STORAGE;

    fn fast_settings() -> TransferConfig {
        TransferConfig {
            register_retry_delay_ms: 0,
            send_retry_delay_ms: 0,
            ..TransferConfig::default()
        }
    }

    fn engine(device: &MemoryTransport) -> TransferEngine<'_, MemoryTransport> {
        TransferEngine::new(device, logging::disabled())
            .with_transfer_config(fast_settings())
            .with_listing_policy(RetryPolicy::new(1, Duration::ZERO))
    }

    #[test]
    fn test_upload_complete_and_verified() {
        let device = MemoryTransport::new();
        let folder = device.add_folder(STORAGE, "/MUSIC/A/B");

        let report = engine(&device)
            .upload(STORAGE, folder, "01_SONG.MP3", b"abcdef", 6)
            .expect("upload");

        assert_eq!(report.status, UploadStatus::Complete);
        assert_eq!(report.verification, Verification::Verified);
        assert_eq!(report.attempts, 1);
        assert_eq!(device.content(report.handle), Some(b"abcdef".to_vec()));
        let info = device.object(report.handle).expect("object");
        assert_eq!(info.parent_handle, folder);
        assert_eq!(info.format, ObjectFormat::AUDIO);
    }

    #[test]
    fn test_over_limit_rejected_before_any_call() {
        let device = MemoryTransport::new();
        let limit = TransferConfig::default().max_upload_bytes;
        let payload = vec![0_u8; usize::try_from(limit + 1).expect("fits")];

        let err = engine(&device)
            .upload(STORAGE, PARENT_ROOT, "BIG.MP3", &payload, limit + 1)
            .expect_err("too large");

        assert_eq!(err.kind(), ErrorKind::TooLarge);
        assert_eq!(device.total_calls(), 0);
    }

    #[test]
    fn test_exactly_at_limit_is_accepted() {
        let device = MemoryTransport::new();
        let settings = TransferConfig {
            max_upload_bytes: 8,
            partial_transfer_bytes: 4,
            ..fast_settings()
        };
        let report = engine(&device)
            .with_transfer_config(settings)
            .upload(STORAGE, PARENT_ROOT, "A.MP3", b"12345678", 8)
            .expect("upload");
        assert_eq!(report.bytes_sent, 8);
    }

    #[test]
    fn test_send_retries_with_fresh_reader() {
        let device = MemoryTransport::new();
        device.inject_fault(
            Fault::new(TransportOp::SendObjectBytes, TransportError::Busy).times(2),
        );

        let report = engine(&device)
            .upload(STORAGE, PARENT_ROOT, "A.MP3", b"abc", 3)
            .expect("upload");

        assert_eq!(report.attempts, 3);
        assert_eq!(report.status, UploadStatus::Complete);
        assert_eq!(device.content(report.handle), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_large_payload_degrades_to_partial_send() {
        let device = MemoryTransport::new();
        let settings = TransferConfig {
            partial_transfer_bytes: 4,
            ..fast_settings()
        };
        device.inject_fault(
            Fault::new(TransportOp::SendObjectBytes, TransportError::Busy).times(3),
        );

        let report = engine(&device)
            .with_transfer_config(settings)
            .upload(STORAGE, PARENT_ROOT, "A.MP3", b"0123456789", 10)
            .expect("degraded upload");

        assert_eq!(report.status, UploadStatus::Degraded { sent: 4, total: 10 });
        assert_eq!(report.attempts, 4);
        assert_eq!(device.content(report.handle), Some(b"0123".to_vec()));
        assert_eq!(
            report.verification,
            Verification::SizeMismatch {
                expected: 10,
                reported: 4
            }
        );
    }

    #[test]
    fn test_small_payload_fails_without_partial_send() {
        let device = MemoryTransport::new();
        device.inject_fault(
            Fault::new(TransportOp::SendObjectBytes, TransportError::Busy).times(3),
        );

        let err = engine(&device)
            .upload(STORAGE, PARENT_ROOT, "A.MP3", b"abc", 3)
            .expect_err("send failed");

        assert!(matches!(
            err,
            Error::Transfer(TransferError::SendFailed { attempts: 3, .. })
        ));
        assert_eq!(device.calls(TransportOp::SendObjectBytes), 3);
    }

    #[test]
    fn test_register_failure_is_reported() {
        let device = MemoryTransport::new();
        device.inject_fault(Fault::new(TransportOp::SetObjectInfo, TransportError::Busy).times(3));

        let err = engine(&device)
            .upload(STORAGE, PARENT_ROOT, "A.MP3", b"abc", 3)
            .expect_err("register failed");
        assert!(matches!(
            err,
            Error::Transfer(TransferError::RegisterFailed { attempts: 3, .. })
        ));
        assert_eq!(device.calls(TransportOp::SendObjectBytes), 0);
    }

    #[test]
    fn test_register_reuses_object_created_by_failed_attempt() {
        let device = MemoryTransport::new();
        let folder = device.add_folder(STORAGE, "/MUSIC");
        device.inject_fault(
            Fault::new(TransportOp::SetObjectInfo, TransportError::Busy).after_effect(),
        );

        let report = engine(&device)
            .upload(STORAGE, folder, "A.MP3", b"abc", 3)
            .expect("upload");

        assert_eq!(device.calls(TransportOp::SetObjectInfo), 1);
        assert_eq!(device.object_count(), 2);
        assert_eq!(device.handle_at(STORAGE, "/MUSIC/A.MP3"), Some(report.handle));
        assert_eq!(device.content(report.handle), Some(b"abc".to_vec()));
        assert_eq!(report.verification, Verification::Verified);
    }

    #[test]
    fn test_size_mismatch_is_not_fatal() {
        let device = MemoryTransport::new();
        let report = engine(&device)
            .upload(STORAGE, PARENT_ROOT, "A.MP3", b"abc", 5)
            .expect("upload");
        assert!(matches!(report.verification, Verification::SizeMismatch { .. }));
    }

    #[test]
    fn test_verification_falls_back_to_parent_listing() {
        let device = MemoryTransport::new();
        let folder = device.add_folder(STORAGE, "/MUSIC");
        // Registration assigns the next handle; fail the first read-back on it.
        let next = folder + 1;
        device.inject_fault(
            Fault::new(TransportOp::GetObjectInfo, TransportError::Busy).for_handle(next),
        );

        let report = engine(&device)
            .upload(STORAGE, folder, "A.MP3", b"abc", 3)
            .expect("upload");
        assert_eq!(report.handle, next);
        assert_eq!(report.verification, Verification::Verified);
    }

    #[test]
    fn test_upload_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("song.mp3");
        fs::write(&path, b"file-bytes").expect("write");

        let device = MemoryTransport::new();
        let job = TransferJob::from_file(STORAGE, PARENT_ROOT, "SONG.MP3", path).expect("job");
        assert_eq!(job.expected_size, 10);

        let report = engine(&device).execute(&job).expect("upload");
        assert_eq!(device.content(report.handle), Some(b"file-bytes".to_vec()));
    }

    #[test]
    fn test_invalid_filename_rejected() {
        let device = MemoryTransport::new();
        let err = engine(&device)
            .upload(STORAGE, PARENT_ROOT, "a/b.mp3", b"abc", 3)
            .expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(device.total_calls(), 0);
    }

    #[test]
    fn test_upload_playlist() {
        let device = MemoryTransport::new();
        let music = device.add_folder(STORAGE, "/MUSIC");
        let doc = PlaylistDocument::from_paths(
            "Road Trip",
            [LogicalPath::new("/Music/Queen/Hits/Song.mp3")],
        );

        let report = engine(&device)
            .upload_playlist(STORAGE, music, &doc, PathStyle::RootUpper)
            .expect("upload");

        let info = device.object(report.handle).expect("object");
        assert_eq!(info.filename, "ROAD_TRIP.m3u8");
        assert_eq!(info.format, ObjectFormat::PLAYLIST);
        let text = String::from_utf8(device.content(report.handle).expect("content"))
            .expect("utf8");
        assert_eq!(
            text,
            "#EXTM3U\n#EXTINF:-1,QUEEN - SONG\n/MUSIC/QUEEN/HITS/SONG.MP3\n"
        );
    }
}
