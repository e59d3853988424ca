use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tabula::StorageEngine;

use crate::DownsampleError;

/// JSON documents stored as `<key>.json` files of a storage engine.
#[derive(Clone)]
pub struct JsonCache {
    engine: Arc<dyn StorageEngine>,
}

impl JsonCache {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Returns the document stored under `key`, or `None` if there is none.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DownsampleError> {
        match self.engine.read_file(&Self::path(key)).await {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), DownsampleError> {
        let contents = serde_json::to_vec(value)?;
        self.engine.write(&Self::path(key), Bytes::from(contents)).await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), DownsampleError> {
        match self.engine.remove(&Self::path(key)).await {
            Err(e) if !e.is_not_found() => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn path(key: &str) -> String {
        format!("{key}.json")
    }
}

impl std::fmt::Debug for JsonCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula::FileSystemStorageEngine;

    #[tokio::test]
    async fn test_get_set_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonCache::new(Arc::new(FileSystemStorageEngine::new(dir.path())));

        assert_eq!(cache.get::<Vec<u32>>("a").await.unwrap(), None);
        cache.set("a", &vec![1u32, 2, 3]).await.unwrap();
        assert_eq!(cache.get::<Vec<u32>>("a").await.unwrap(), Some(vec![1, 2, 3]));
        assert!(dir.path().join("a.json").exists());

        cache.remove("a").await.unwrap();
        cache.remove("a").await.unwrap();
        assert_eq!(cache.get::<Vec<u32>>("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FileSystemStorageEngine::new(dir.path()));
        engine.write("a.json", Bytes::from_static(b"not json")).await.unwrap();

        let cache = JsonCache::new(engine);
        assert!(matches!(
            cache.get::<Vec<u32>>("a").await,
            Err(DownsampleError::Serialization(_))
        ));
    }
}
