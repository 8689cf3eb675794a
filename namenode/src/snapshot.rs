use std::path::Path;

use serde::{Deserialize, Serialize};
use utilities::result::Result;

use crate::chunk_table::ChunkTableState;
use crate::file_tree::Tree;

/// Whole-state snapshot of the directory tree and the chunk table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub tree: Tree,
    pub chunks: ChunkTableState,
}

pub async fn save(path: impl AsRef<Path>, snapshot: &Snapshot) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

pub async fn load(path: impl AsRef<Path>) -> Result<Option<Snapshot>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
