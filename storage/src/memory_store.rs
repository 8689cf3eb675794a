use std::collections::HashMap;
use std::io::Cursor;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::chunk_store::{ChunkStore, ChunkStoreError, Result};

const MEMORY_CAPACITY: u64 = 1 << 30;

/// In-memory chunk container used by the test suites.
pub struct InMemoryChunkStore {
    index: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryChunkStore {
    pub fn new(seed: HashMap<String, String>) -> Self {
        let index = seed
            .into_iter()
            .map(|(id, data)| (id, data.into_bytes()))
            .collect();
        Self {
            index: RwLock::new(index),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    pub fn contents(&self, id: &str) -> Option<Vec<u8>> {
        self.index.read().unwrap().get(id).cloned()
    }

    pub fn chunk_count(&self) -> usize {
        self.index.read().unwrap().len()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn get(&self, id: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let data = self
            .index
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ChunkStoreError::NotFound)?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn create(&self, id: &str, data: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        if self.index.read().unwrap().contains_key(id) {
            return Err(ChunkStoreError::AlreadyExists);
        }
        let mut buf = Vec::new();
        data.read_to_end(&mut buf).await?;
        let written = buf.len() as u64;
        self.index.write().unwrap().insert(id.to_owned(), buf);
        Ok(written)
    }

    async fn exists(&self, id: &str) -> bool {
        self.index.read().unwrap().contains_key(id)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.index
            .write()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or(ChunkStoreError::NotFound)
    }

    async fn bytes_available(&self) -> u64 {
        let used: usize = self.index.read().unwrap().values().map(Vec::len).sum();
        MEMORY_CAPACITY.saturating_sub(used as u64)
    }
}
