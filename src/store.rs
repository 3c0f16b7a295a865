use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Opaque key to one stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(String);

impl Handle {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// Scratch storage scoped to a single request. `delete` is idempotent.
///
/// `reserve` only names the slot; nothing exists until `write` runs, so a
/// caller can take ownership of the handle before any bytes hit storage.
#[async_trait]
pub trait TransientStore: Send + Sync {
    fn reserve(&self, original_filename: &str) -> Handle;
    async fn write(&self, handle: &Handle, bytes: &[u8]) -> Result<(), StoreError>;
    async fn read(&self, handle: &Handle) -> Result<Vec<u8>, StoreError>;
    async fn delete(&self, handle: &Handle) -> Result<(), StoreError>;

    async fn put(&self, bytes: &[u8], original_filename: &str) -> Result<Handle, StoreError> {
        let handle = self.reserve(original_filename);
        self.write(&handle, bytes).await?;
        Ok(handle)
    }
}

/// Files under one directory, named `<millis>-<uuid>-<sanitized name>`.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    /// Creates the root directory when missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(root);
        if tokio::fs::metadata(&store.root).await.is_err() {
            tokio::fs::create_dir_all(&store.root).await.map_err(|e| io_err(&store.root, e))?;
            info!("📁 Created uploads directory at {}", store.root.display());
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path { &self.root }

    fn path_for(&self, handle: &Handle) -> PathBuf { self.root.join(handle.as_str()) }
}

#[async_trait]
impl TransientStore for DiskStore {
    fn reserve(&self, original_filename: &str) -> Handle {
        Handle(format!(
            "{}-{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple(),
            sanitize_filename(original_filename)
        ))
    }

    async fn write(&self, handle: &Handle, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(handle);
        tokio::fs::write(&path, bytes).await.map_err(|e| io_err(&path, e))
    }

    async fn read(&self, handle: &Handle) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(handle);
        tokio::fs::read(&path).await.map_err(|e| io_err(&path, e))
    }

    async fn delete(&self, handle: &Handle) -> Result<(), StoreError> {
        let path = self.path_for(handle);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io { path: path.display().to_string(), source }
}

/// Keeps only `[A-Za-z0-9._-]`, drops separators and `..`, caps at 100 chars.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|&c| c != '/' && c != '\\' && c != '\0')
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let mut cleaned = cleaned.replace("..", "");
    cleaned.truncate(100);
    if cleaned.trim_matches('.').is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

/// Owns a handle from before its first byte is written until it is released.
/// Dropping it without calling [`CleanupGuard::release`] (the request future was
/// cancelled) schedules the delete on the current runtime, after any write still
/// in flight has finished.
pub struct CleanupGuard {
    store: Arc<dyn TransientStore>,
    handle: Option<Handle>,
    pending_write: Option<JoinHandle<Result<(), StoreError>>>,
}

impl CleanupGuard {
    pub fn new(store: Arc<dyn TransientStore>, handle: Handle) -> Self {
        Self { store, handle: Some(handle), pending_write: None }
    }

    /// Writes the guarded handle on a detached task the guard keeps track of.
    pub async fn write(&mut self, bytes: Bytes) -> Result<(), StoreError> {
        let Some(handle) = self.handle.clone() else { return Ok(()) };
        let store = Arc::clone(&self.store);
        let task = self
            .pending_write
            .insert(tokio::spawn(async move { store.write(&handle, &bytes).await }));
        let joined = task.await;
        self.pending_write = None;
        joined.map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Deletes the file. Failures are logged and swallowed.
    pub async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.store.delete(&handle).await {
                warn!(%handle, error = %e, "⚠️ Failed to delete uploaded file");
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else { return };
        let store = Arc::clone(&self.store);
        let pending_write = self.pending_write.take();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                warn!(%handle, "🔄 Request abandoned before cleanup, deleting in background");
                rt.spawn(async move {
                    if let Some(write) = pending_write {
                        let _ = write.await;
                    }
                    if let Err(e) = store.delete(&handle).await {
                        warn!(%handle, error = %e, "⚠️ Background delete failed");
                    }
                });
            }
            Err(_) => warn!(%handle, "⚠️ No runtime available, uploaded file left behind"),
        }
    }
}
