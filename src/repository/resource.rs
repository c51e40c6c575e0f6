//! Resource handles and their per-repository cache

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::address::{self, ObjectAddress};
use crate::storage::{ObjectBody, ObjectMetadata, ObjectStore, StoreError, StoreResult};
use crate::types::RepoResult;

/// Lazy accessor for one object. Metadata is fetched with a head request the
/// first time it is needed and kept until the object is rewritten.
pub struct S3Resource {
    name: String,
    location: ObjectAddress,
    store: Arc<dyn ObjectStore>,
    metadata: Mutex<Option<ObjectMetadata>>,
}

impl S3Resource {
    fn new(name: String, location: ObjectAddress, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name,
            location,
            store,
            metadata: Mutex::new(None),
        }
    }

    /// Normalized address this handle was created for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &ObjectAddress {
        &self.location
    }

    async fn metadata(&self) -> StoreResult<ObjectMetadata> {
        let mut cached = self.metadata.lock().await;
        if let Some(metadata) = cached.as_ref() {
            return Ok(metadata.clone());
        }
        let metadata = self
            .store
            .head_object(&self.location.bucket, &self.location.key)
            .await?;
        *cached = Some(metadata.clone());
        Ok(metadata)
    }

    pub async fn exists(&self) -> StoreResult<bool> {
        match self.metadata().await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn content_length(&self) -> StoreResult<u64> {
        Ok(self.metadata().await?.content_length)
    }

    pub async fn last_modified(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.metadata().await?.last_modified)
    }

    /// Content length if it has already been fetched, zero otherwise.
    pub async fn known_content_length(&self) -> u64 {
        self.metadata
            .lock()
            .await
            .as_ref()
            .map_or(0, |metadata| metadata.content_length)
    }

    pub async fn open_stream(&self) -> StoreResult<ObjectBody> {
        self.store
            .get_object(&self.location.bucket, &self.location.key)
            .await
    }

    /// Drops cached metadata so the next read sees the current object.
    pub async fn invalidate(&self) {
        *self.metadata.lock().await = None;
    }
}

impl std::fmt::Debug for S3Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Resource")
            .field("name", &self.name)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Address to handle mapping. Handles are never evicted; a repository is
/// expected to live for one resolution session.
pub struct ResourceCache {
    store: Arc<dyn ObjectStore>,
    handles: DashMap<String, Arc<S3Resource>>,
}

impl ResourceCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            handles: DashMap::new(),
        }
    }

    /// Returns the handle for `address`, creating it on first use. Addresses
    /// that normalize to the same string share one handle.
    pub fn resolve(&self, address: &str) -> RepoResult<Arc<S3Resource>> {
        let name = address::normalize(address)?;
        if let Some(handle) = self.handles.get(&name) {
            return Ok(Arc::clone(handle.value()));
        }

        let location = ObjectAddress::parse(&name)?;
        let handle = self
            .handles
            .entry(name.clone())
            .or_insert_with(|| Arc::new(S3Resource::new(name, location, Arc::clone(&self.store))));
        Ok(Arc::clone(handle.value()))
    }

    /// Existing handle for `address`, without creating one.
    pub fn get(&self, address: &str) -> Option<Arc<S3Resource>> {
        let name = address::normalize(address).ok()?;
        self.handles.get(&name).map(|handle| Arc::clone(handle.value()))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
