use std::fmt::Display;

use async_trait::async_trait;
use tokio::io::AsyncRead;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkStoreError {
    NotFound,
    AlreadyExists,
    Io(String),
}

impl Display for ChunkStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkStoreError::NotFound => {
                write!(f, "chunk not found")
            }
            ChunkStoreError::AlreadyExists => {
                write!(f, "chunk already exists")
            }
            ChunkStoreError::Io(msg) => {
                write!(f, "store io error: {}", msg)
            }
        }
    }
}

impl std::error::Error for ChunkStoreError {}

impl From<std::io::Error> for ChunkStoreError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::NotFound => ChunkStoreError::NotFound,
            std::io::ErrorKind::AlreadyExists => ChunkStoreError::AlreadyExists,
            _ => ChunkStoreError::Io(value.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChunkStoreError>;

/// A chunk container addressed by opaque string ids. `create` must reject a
/// duplicate id before consuming any of the input stream.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
    async fn create(&self, id: &str, data: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64>;
    async fn exists(&self, id: &str) -> bool;
    async fn remove(&self, id: &str) -> Result<()>;
    async fn bytes_available(&self) -> u64;
}

#[cfg(test)]
pub mod tests {
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    use super::*;

    pub async fn chunk_store_contract(store: impl ChunkStore) -> Result<()> {
        let chunk_id = "test_chunk.bin";
        let original_data = b"hello world";

        // store a chunk
        let mut input_stream = Cursor::new(&original_data[..]);
        let written = store.create(chunk_id, &mut input_stream).await?;
        assert_eq!(written as usize, original_data.len());
        assert!(store.exists(chunk_id).await);

        // a second create with the same id is rejected
        let mut input_stream = Cursor::new(&original_data[..]);
        let err = store.create(chunk_id, &mut input_stream).await.unwrap_err();
        assert_eq!(err, ChunkStoreError::AlreadyExists);

        // read it back
        let mut reader = store.get(chunk_id).await?;
        let mut read_buf = Vec::new();
        reader
            .read_to_end(&mut read_buf)
            .await
            .map_err(ChunkStoreError::from)?;
        assert_eq!(read_buf, original_data);

        // remove it
        store.remove(chunk_id).await?;
        assert!(!store.exists(chunk_id).await);
        assert_eq!(store.get(chunk_id).await.err(), Some(ChunkStoreError::NotFound));

        // removing a missing chunk reports not found
        assert_eq!(store.remove(chunk_id).await.unwrap_err(), ChunkStoreError::NotFound);

        assert!(store.bytes_available().await > 0);
        Ok(())
    }
}
