//! Chunked, resumable upload staging (spec §4.8).
//!
//! Built on the same `DashMap`-registry idiom
//! `loom-runtime::supervisor::Supervisor` uses, applied to upload state
//! instead of process state. Staged bytes are appended directly to a file
//! under a configured directory rather than buffered in memory, so an
//! upload's size is bounded by disk, not RAM.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use loom_core::errors::{UploadError, UploadErrorKind};
use loom_core::ids::UploadId;

type UploadResult<T> = Result<T, UploadError>;

struct StagedUpload {
    file: Mutex<std::fs::File>,
    path: PathBuf,
    project_id: String,
    session_id: String,
    filename: String,
    declared_size: u64,
    received: AtomicU64,
}

/// Reference to a file once an upload completes, handed back to the
/// caller for attaching to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRef {
    /// Final on-disk path, inside the project's attachment directory.
    pub path: PathBuf,
    /// Original client-declared filename.
    pub filename: String,
}

/// Staging area for in-progress chunked uploads (spec.md §4.8:
/// `startUpload`/`writeChunk`/`completeUpload`/`cancelUpload`).
pub struct UploadManager {
    staging_dir: PathBuf,
    max_size: u64,
    uploads: DashMap<UploadId, StagedUpload>,
}

impl UploadManager {
    /// `max_size` of `0` means unlimited (`TimeoutSettings::max_upload_size_bytes`).
    pub fn new(staging_dir: impl Into<PathBuf>, max_size: u64) -> std::io::Result<Self> {
        let staging_dir = staging_dir.into();
        std::fs::create_dir_all(&staging_dir)?;
        Ok(Self { staging_dir, max_size, uploads: DashMap::new() })
    }

    /// Begin tracking a new upload. Rejects an id that's already staged
    /// (spec.md §8's S5 scenario: a reconnect must mint a fresh id) and a
    /// declared size over the configured cap.
    pub fn start_upload(
        &self,
        upload_id: UploadId,
        project_id: String,
        session_id: String,
        filename: String,
        declared_size: u64,
    ) -> UploadResult<()> {
        if self.max_size != 0 && declared_size > self.max_size {
            return Err(UploadError::new(UploadErrorKind::TooLarge, format!("declared size {declared_size} exceeds cap {}", self.max_size)));
        }
        if self.uploads.contains_key(&upload_id) {
            return Err(UploadError::new(UploadErrorKind::AlreadyInUse, format!("upload {upload_id} is already staged")));
        }

        let path = self.staging_dir.join(upload_id.as_str());
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| UploadError::new(UploadErrorKind::Io, "failed to create staging file").with_source(e))?;

        self.uploads.insert(
            upload_id,
            StagedUpload { file: Mutex::new(file), path, project_id, session_id, filename, declared_size, received: AtomicU64::new(0) },
        );
        Ok(())
    }

    /// Append a chunk at `offset`. Rejects a non-contiguous offset (spec.md
    /// §8 property 7) and a write that would exceed the declared size.
    pub fn write_chunk(&self, upload_id: &UploadId, offset: u64, bytes: &[u8]) -> UploadResult<u64> {
        let staged = self.uploads.get(upload_id).ok_or_else(|| UploadError::new(UploadErrorKind::NotFound, format!("no upload {upload_id}")))?;

        let current = staged.received.load(Ordering::SeqCst);
        if offset != current {
            return Err(UploadError::new(
                UploadErrorKind::InvalidOffset,
                format!("chunk offset {offset} does not match bytesReceived {current}"),
            ));
        }
        if staged.declared_size != 0 && current + bytes.len() as u64 > staged.declared_size {
            return Err(UploadError::new(UploadErrorKind::TooLarge, "chunk would exceed declared upload size"));
        }

        let mut file = staged.file.lock();
        file.seek(SeekFrom::Start(offset)).map_err(|e| UploadError::new(UploadErrorKind::Io, "seek failed").with_source(e))?;
        file.write_all(bytes).map_err(|e| UploadError::new(UploadErrorKind::Io, "write failed").with_source(e))?;
        drop(file);

        let received = staged.received.fetch_add(bytes.len() as u64, Ordering::SeqCst) + bytes.len() as u64;
        Ok(received)
    }

    /// Finalize an upload: verify the declared size was fully received,
    /// then move the staged file into the project's attachment directory.
    pub fn complete_upload(&self, upload_id: &UploadId) -> UploadResult<FileRef> {
        let (_, staged) = self
            .uploads
            .remove(upload_id)
            .ok_or_else(|| UploadError::new(UploadErrorKind::NotFound, format!("no upload {upload_id}")))?;

        let received = staged.received.load(Ordering::SeqCst);
        if received != staged.declared_size {
            return Err(UploadError::new(
                UploadErrorKind::InvalidOffset,
                format!("received {received} bytes, expected {}", staged.declared_size),
            ));
        }

        let attachments_dir = attachment_dir(&staged.project_id, &staged.session_id, &self.staging_dir);
        std::fs::create_dir_all(&attachments_dir)
            .map_err(|e| UploadError::new(UploadErrorKind::Io, "failed to create attachment directory").with_source(e))?;
        let final_path = attachments_dir.join(&staged.filename);
        std::fs::rename(&staged.path, &final_path).map_err(|e| UploadError::new(UploadErrorKind::Io, "failed to finalize upload").with_source(e))?;

        Ok(FileRef { path: final_path, filename: staged.filename })
    }

    /// Abort an in-progress upload and delete its partial file (spec.md
    /// §5: a connection drop cancels in-flight uploads the same way).
    pub fn cancel_upload(&self, upload_id: &UploadId) -> UploadResult<()> {
        let (_, staged) = self
            .uploads
            .remove(upload_id)
            .ok_or_else(|| UploadError::new(UploadErrorKind::NotFound, format!("no upload {upload_id}")))?;
        let _ = std::fs::remove_file(&staged.path);
        Ok(())
    }

    /// Bytes received so far for an in-progress upload.
    #[must_use]
    pub fn bytes_received(&self, upload_id: &UploadId) -> Option<u64> {
        self.uploads.get(upload_id).map(|e| e.received.load(Ordering::SeqCst))
    }
}

fn attachment_dir(project_id: &str, session_id: &str, staging_dir: &Path) -> PathBuf {
    staging_dir.join("attachments").join(project_id).join(session_id)
}
