//! Transient files owned by a single combine invocation.
//!
//! Both guards delete what they own on drop, so every exit path of a request
//! (success, error, client disconnect) leaves the temp directory clean.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_core::Stream;
use tokio::io::AsyncReadExt;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Name of the staged file holding the audio of line `index`
pub fn staged_file_name(token: &str, index: usize) -> String {
    format!("audio_{token}_{index:04}.mp3")
}

/// Name of the merged output file; millisecond timestamp plus invocation token
pub fn merged_file_name(token: &str) -> String {
    format!("combined_{}_{token}.mp3", chrono::Utc::now().timestamp_millis())
}

// Blocking unlink: Drop cannot await, and removing a small file does not
// stall the worker in practice.
fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {e}", path.display()),
    }
}

/// Per-line audio files, in input order.
#[derive(Debug)]
pub struct StagedFiles {
    paths: Vec<PathBuf>,
}

impl StagedFiles {
    /// Write one file per buffer. Files written before a failure are removed
    /// when the partially filled guard drops.
    pub async fn write(dir: &Path, token: &str, buffers: &[Vec<u8>]) -> io::Result<Self> {
        let mut staged = Self {
            paths: Vec::with_capacity(buffers.len()),
        };
        for (index, buffer) in buffers.iter().enumerate() {
            let path = dir.join(staged_file_name(token, index));
            // Track before writing: a failed write may still leave a file behind.
            staged.paths.push(path.clone());
            tokio::fs::write(&path, buffer).await?;
        }
        Ok(staged)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            remove_quietly(path);
        }
    }
}

/// The concatenated output. The path is reserved before the concatenation
/// runs so a partial output is removed too.
#[derive(Debug)]
pub struct MergedFile {
    path: PathBuf,
}

impl MergedFile {
    pub fn reserve(dir: &Path, token: &str) -> Self {
        Self {
            path: dir.join(merged_file_name(token)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> io::Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    /// Stream the file contents. The guard moves into the stream and the file
    /// is deleted once the stream finishes or is dropped.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let guard = self;
        async_stream::try_stream! {
            let mut file = tokio::fs::File::open(guard.path()).await?;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
            drop(file);
            drop(guard);
        }
    }
}

impl Drop for MergedFile {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}
