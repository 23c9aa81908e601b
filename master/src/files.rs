//! Task artifact storage
//!
//! Workers upload task artifacts in gzip+base64 chunks; the master appends
//! them under `{data_dir}/files/{user}/{task_id}/`. File names are
//! validated so a worker cannot escape its task directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use shared::api::FileChunkRequest;
use shared::utils::decompress_payload;

/// Cap on a single decompressed chunk.
const MAX_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Metadata for a finished upload, handed to the persistence adapter.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub task_id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: u64,
}

/// Appends uploaded chunks to per-task artifact files.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates the store rooted at `{data_dir}/files`.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let root = data_dir.as_ref().join("files");
        if !root.exists() {
            std::fs::create_dir_all(&root)
                .with_context(|| format!("Failed to create file store root: {}", root.display()))?;
        }
        Ok(Self { root })
    }

    /// Validates and stores one chunk. Returns metadata when the chunk was
    /// the final one (`eof`), `None` otherwise.
    pub async fn store_chunk(&self, request: &FileChunkRequest) -> Result<Option<StoredFile>> {
        validate_path_component(&request.user_id)?;
        validate_path_component(&request.task_id)?;
        validate_file_name(&request.file_name)?;

        let bytes = decompress_payload(&request.data, MAX_CHUNK_BYTES)?;

        let dir = self.root.join(&request.user_id).join(&request.task_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create artifact directory: {}", dir.display()))?;

        let path = dir.join(&request.file_name);

        // The first chunk starts the file fresh; later chunks append.
        let mut file = if request.seq == 0 {
            tokio::fs::File::create(&path).await
        } else {
            tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .await
        }
        .with_context(|| format!("Failed to open artifact file: {}", path.display()))?;

        file.write_all(&bytes)
            .await
            .with_context(|| format!("Failed to write artifact file: {}", path.display()))?;
        file.flush().await?;

        debug!(
            task_id = %request.task_id,
            file_name = %request.file_name,
            seq = request.seq,
            bytes = bytes.len(),
            "Stored artifact chunk"
        );

        if request.eof {
            let size_bytes = tokio::fs::metadata(&path).await?.len();
            info!(
                task_id = %request.task_id,
                file_name = %request.file_name,
                size_bytes,
                "Artifact upload complete"
            );
            return Ok(Some(StoredFile {
                task_id: request.task_id.clone(),
                user_id: request.user_id.clone(),
                file_name: request.file_name.clone(),
                file_path: path.display().to_string(),
                size_bytes,
            }));
        }
        Ok(None)
    }
}

/// Rejects path components that could climb out of the store.
fn validate_path_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
    {
        anyhow::bail!("Invalid path component: '{}'", component);
    }
    Ok(())
}

/// File names follow the same rules plus a length cap.
fn validate_file_name(file_name: &str) -> Result<()> {
    validate_path_component(file_name)?;
    if file_name.len() > 255 {
        anyhow::bail!("File name too long: {} characters", file_name.len());
    }
    Ok(())
}
