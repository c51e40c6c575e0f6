//! In-memory object store
//!
//! Behaves like a single S3 region held in process memory: buckets must be
//! created before use, listings are lexicographic, delimited and paginated.
//! Call counters and failure injection make it usable as a test double.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::io::AsyncReadExt;

use super::{
    ListRequest, ListingPage, ObjectBody, ObjectMetadata, ObjectStore, ObjectSummary, PutRequest,
    StoreError, StoreResult,
};
use crate::config::{CannedAcl, ServerSideEncryption, StorageClass};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// An object as it was written, including its write-policy tagging.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
    pub storage_class: StorageClass,
    pub acl: Option<CannedAcl>,
    pub server_side_encryption: Option<ServerSideEncryption>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug)]
pub struct InMemoryStore {
    buckets: DashMap<String, BTreeMap<String, StoredObject>>,
    page_size: usize,
    failing_bucket_creations: AtomicU32,
    create_bucket_calls: AtomicUsize,
    list_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            failing_bucket_creations: AtomicU32::new(0),
            create_bucket_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
        }
    }

    /// Caps the number of entries (keys plus common prefixes) per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.buckets.entry(bucket.to_string()).or_default();
        self
    }

    /// Makes the next `times` bucket creations fail with a service error.
    pub fn fail_bucket_creation(&self, times: u32) {
        self.failing_bucket_creations.store(times, Ordering::SeqCst);
    }

    /// Writes an object directly, bypassing request accounting.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                content_type: "application/octet-stream".to_string(),
                storage_class: StorageClass::Standard,
                acl: None,
                server_side_encryption: None,
                last_modified: Utc::now(),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets.get(bucket)?.get(key).cloned()
    }

    pub fn create_bucket_calls(&self) -> usize {
        self.create_bucket_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn no_such_bucket(operation: &'static str, bucket: &str) -> StoreError {
        StoreError::service(operation, format!("NoSuchBucket: {bucket}"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

enum Entry {
    Prefix(String),
    Object(ObjectSummary),
}

impl Entry {
    fn marker(&self) -> &str {
        match self {
            Entry::Prefix(prefix) => prefix,
            Entry::Object(summary) => &summary.key,
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.create_bucket_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failing_bucket_creations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::service(
                "create bucket",
                "OperationAborted: A conflicting conditional operation is in progress",
            ));
        }

        self.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListingPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let objects = self
            .buckets
            .get(&request.bucket)
            .ok_or_else(|| Self::no_such_bucket("list objects", &request.bucket))?;

        let marker = request.marker.as_deref();
        let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
        let mut seen_prefixes = BTreeSet::new();
        let mut entries = Vec::new();

        for (key, object) in objects.range(request.prefix.clone()..) {
            if !key.starts_with(&request.prefix) {
                break;
            }
            if let Some(marker) = marker {
                let rolled_up =
                    delimiter.is_some_and(|d| marker.ends_with(d) && key.starts_with(marker));
                if key.as_str() <= marker || rolled_up {
                    continue;
                }
            }

            let rest = &key[request.prefix.len()..];
            match delimiter.and_then(|d| rest.find(d).map(|at| at + d.len())) {
                Some(end) => {
                    let common = format!("{}{}", request.prefix, &rest[..end]);
                    if seen_prefixes.insert(common.clone()) {
                        entries.push(Entry::Prefix(common));
                    }
                }
                None => entries.push(Entry::Object(ObjectSummary {
                    key: key.clone(),
                    size: object.body.len() as u64,
                })),
            }
        }

        let truncated = entries.len() > self.page_size;
        entries.truncate(self.page_size);

        let mut page = ListingPage {
            next_marker: if truncated {
                entries.last().map(|entry| entry.marker().to_string())
            } else {
                None
            },
            ..ListingPage::default()
        };
        for entry in entries {
            match entry {
                Entry::Prefix(prefix) => page.common_prefixes.push(prefix),
                Entry::Object(summary) => page.objects.push(summary),
            }
        }
        Ok(page)
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket("head object", bucket))?;
        Ok(objects.contains_key(key))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectMetadata> {
        let object = self.object(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        Ok(ObjectMetadata {
            content_length: object.body.len() as u64,
            last_modified: Some(object.last_modified),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
        let object = self.object(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        Ok(Box::new(Cursor::new(object.body)))
    }

    async fn put_object(&self, mut request: PutRequest) -> StoreResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if !self.buckets.contains_key(&request.bucket) {
            return Err(Self::no_such_bucket("put object", &request.bucket));
        }
        let mut body = Vec::with_capacity(request.content_length as usize);
        request
            .body
            .read_to_end(&mut body)
            .await
            .map_err(|e| StoreError::service("put object", e))?;

        let mut objects = self
            .buckets
            .get_mut(&request.bucket)
            .ok_or_else(|| Self::no_such_bucket("put object", &request.bucket))?;
        objects.insert(
            request.key,
            StoredObject {
                body: body.into(),
                content_type: request.content_type,
                storage_class: request.storage_class,
                acl: request.acl,
                server_side_encryption: request.server_side_encryption,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }
}
