use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("blob storage failure: {0}")]
    Backend(String),
}

/// Blob storage boundary. The core only needs "attach bytes with a filename"
/// and "purge all attached" keyed by the owning product or listing.
pub trait MediaStore: Send + Sync {
    fn attach(&self, owner: Uuid, filename: &str, bytes: Vec<u8>) -> Result<(), MediaError>;
    fn purge(&self, owner: Uuid) -> Result<usize, MediaError>;
    fn attached(&self, owner: Uuid) -> Result<Vec<String>, MediaError>;
}

#[derive(Default)]
pub struct MemoryMediaStore {
    blobs: RwLock<HashMap<Uuid, Vec<(String, Vec<u8>)>>>,
}

impl MediaStore for MemoryMediaStore {
    fn attach(&self, owner: Uuid, filename: &str, bytes: Vec<u8>) -> Result<(), MediaError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| MediaError::Backend("poisoned lock".to_string()))?;
        blobs
            .entry(owner)
            .or_default()
            .push((filename.to_string(), bytes));
        Ok(())
    }

    fn purge(&self, owner: Uuid) -> Result<usize, MediaError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| MediaError::Backend("poisoned lock".to_string()))?;
        Ok(blobs.remove(&owner).map(|entries| entries.len()).unwrap_or(0))
    }

    fn attached(&self, owner: Uuid) -> Result<Vec<String>, MediaError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| MediaError::Backend("poisoned lock".to_string()))?;
        Ok(blobs
            .get(&owner)
            .map(|entries| entries.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }
}
