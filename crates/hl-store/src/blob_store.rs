use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::record_store::{Result, StoreError};

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

/// Key for one egg's generated chick image.
pub fn chick_image_key(clutch_id: Uuid, egg_id: Uuid) -> String {
    format!("chicks/{clutch_id}/{egg_id}.png")
}

/// Key for the clutch-level composite image of all viable chicks.
pub fn composite_image_key(clutch_id: Uuid) -> String {
    format!("clutches/{clutch_id}/chickens.png")
}

// ---------------------------------------------------------------------------
// BlobStore trait
// ---------------------------------------------------------------------------

/// Binary object storage for generated images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object and return its storage URL.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory blob store for tests and single-process runs.
pub struct MemoryBlobStore {
    bucket: String,
    objects: DashMap<String, (String, Vec<u8>)>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: DashMap::new(),
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("blob://{}/{}", self.bucket, key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        if key.is_empty() {
            return Err(StoreError::Backend("empty blob key".to_string()));
        }
        self.objects
            .insert(key.to_string(), (content_type.to_string(), bytes));
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.get(key).map(|o| o.1.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_matches_contract() {
        let clutch = Uuid::new_v4();
        let egg = Uuid::new_v4();
        assert_eq!(
            chick_image_key(clutch, egg),
            format!("chicks/{clutch}/{egg}.png")
        );
        assert_eq!(
            composite_image_key(clutch),
            format!("clutches/{clutch}/chickens.png")
        );
    }

    #[tokio::test]
    async fn put_returns_url_and_get_round_trips() {
        let store = MemoryBlobStore::new("hatchline-images");
        let url = store
            .put("chicks/a/b.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "blob://hatchline-images/chicks/a/b.png");
        assert_eq!(
            store.get("chicks/a/b.png").await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(store.get("missing.png").await.unwrap(), None);
    }
}
