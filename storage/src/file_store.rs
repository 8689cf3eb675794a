use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::{self, File},
    io::{copy, AsyncRead},
};
use tracing::{error, info, instrument};

use crate::chunk_store::{ChunkStore, ChunkStoreError, Result};

/// On-disk chunk container, one file per chunk id under a root directory.
#[derive(Clone)]
pub struct FileChunkStore {
    root: PathBuf,
}

impl FileChunkStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        match fs::create_dir_all(&root).await {
            Ok(_) => {
                info!(root = %root.display(), "Created root for chunk storage");
            }
            Err(e) => {
                error!(root = %root.display(), error = %e, "Error while creating the storage root");
                return Err(e.into());
            }
        }
        Ok(FileChunkStore { root })
    }

    fn chunk_path(&self, id: &str) -> Result<PathBuf> {
        // ids come from the wire; keep them inside the root
        if id.is_empty() || id.contains('/') || id.contains("..") {
            return Err(ChunkStoreError::Io(format!("invalid chunk id: {id}")));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl ChunkStore for FileChunkStore {
    #[instrument(name = "file_store_get", skip(self))]
    async fn get(&self, id: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let chunk_file = File::open(self.chunk_path(id)?).await?;
        Ok(Box::new(chunk_file))
    }

    #[instrument(name = "file_store_create", skip(self, data))]
    async fn create(&self, id: &str, data: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let chunk_path = self.chunk_path(id)?;
        let mut chunk_file = File::create_new(&chunk_path).await?;
        match copy(data, &mut chunk_file).await {
            Ok(written) => {
                info!(%id, %written, "chunk stored");
                Ok(written)
            }
            Err(e) => {
                // do not leave a half written chunk behind
                let _ = fs::remove_file(&chunk_path).await;
                Err(e.into())
            }
        }
    }

    async fn exists(&self, id: &str) -> bool {
        match self.chunk_path(id) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    #[instrument(name = "file_store_remove", skip(self))]
    async fn remove(&self, id: &str) -> Result<()> {
        fs::remove_file(self.chunk_path(id)?).await?;
        Ok(())
    }

    async fn bytes_available(&self) -> u64 {
        match nix::sys::statvfs::statvfs(&self.root) {
            Ok(stats) => stats.blocks_available() as u64 * stats.fragment_size() as u64,
            Err(e) => {
                error!(error = %e, "Error while reading free space of storage root");
                0
            }
        }
    }
}
