//! In-process [`ObjectStore`]

use async_trait::async_trait;
use crime_common::{EtlError, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{calculate_sha256, ObjectStore, UploadResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
}

/// Objects held in a sorted map; listing returns keys in lexical order
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects().contains_key(key)
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects().get(key).and_then(|o| o.content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<UploadResult> {
        let result = UploadResult {
            key: key.to_string(),
            checksum: calculate_sha256(&data),
            size: data.len() as i64,
        };
        self.objects().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(result)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| EtlError::not_found(format!("object {}", key)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list() {
        let store = MemoryStore::new();
        store.put("stage/b.csv", b"b".to_vec(), None).await.unwrap();
        store.put("stage/a.csv", b"a".to_vec(), Some("text/csv")).await.unwrap();
        store.put("other/c.csv", b"c".to_vec(), None).await.unwrap();

        assert_eq!(store.get("stage/a.csv").await.unwrap(), b"a");
        assert_eq!(
            store.list("stage/").await.unwrap(),
            vec!["stage/a.csv".to_string(), "stage/b.csv".to_string()]
        );
        assert!(matches!(store.get("missing").await, Err(EtlError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new();
        store.put("k", b"one".to_vec(), None).await.unwrap();
        let result = store.put("k", b"three".to_vec(), None).await.unwrap();
        assert_eq!(result.size, 5);
        assert_eq!(store.get("k").await.unwrap(), b"three");
        assert_eq!(store.keys().len(), 1);
    }
}
