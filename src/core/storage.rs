//! Crash-consistent filesystem primitives.
//!
//! Every write goes to a uniquely named temp file in the destination
//! directory, is flushed and synced, then renamed over the destination.
//! A reader can therefore never observe a half-written file, even if
//! the process dies mid-write. All mutations pass through the tier
//! guard's write-permission check first.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::tier::TierGuard;

/// Atomic write/append/delete, gated by the tier guard
#[derive(Debug, Clone)]
pub struct AtomicStore {
    guard: Arc<TierGuard>,
}

impl AtomicStore {
    /// Create a store enforcing the given guard's write policy
    pub fn new(guard: Arc<TierGuard>) -> Self {
        Self { guard }
    }

    /// The guard this store enforces
    pub fn guard(&self) -> &TierGuard {
        &self.guard
    }

    /// Write `bytes` to `path` atomically.
    ///
    /// On any failure the temp file is removed and the destination is
    /// left untouched. Parent directories are created as needed.
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.guard.validate_write_permission(path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let temp_path = temp_sibling(path);

        let result = async {
            let mut file = fs::File::create(&temp_path)
                .await
                .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

            file.write_all(bytes)
                .await
                .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
            file.flush().await.context("Failed to flush temp file")?;
            file.sync_all()
                .await
                .context("Failed to sync temp file to disk")?;
            drop(file);

            fs::rename(&temp_path, path)
                .await
                .with_context(|| format!("Failed to rename into place: {}", path.display()))
        }
        .await;

        if result.is_err() {
            // Best-effort cleanup; the original error is what matters
            let _ = fs::remove_file(&temp_path).await;
        }

        result
    }

    /// Append a single line to `path` (created if absent).
    ///
    /// Not atomic across processes beyond what O_APPEND provides;
    /// callers keep individual appends to one line.
    pub async fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        self.guard.validate_write_permission(path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open for append: {}", path.display()))?;

        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .with_context(|| format!("Failed to append to: {}", path.display()))?;
        file.flush().await.context("Failed to flush append")?;

        Ok(())
    }

    /// Delete `path` if it exists
    pub async fn delete(&self, path: &Path) -> Result<()> {
        self.guard.validate_write_permission(path)?;

        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete: {}", path.display())),
        }
    }
}

/// Unique temp-file name next to `path`.
///
/// Includes a high-resolution clock value and a random suffix so
/// concurrent writers to the same destination never collide.
fn temp_sibling(path: &Path) -> std::path::PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let suffix: u32 = rand::thread_rng().gen();

    path.with_file_name(format!(".{}.{}.{:08x}.tmp", name, nanos, suffix))
}
