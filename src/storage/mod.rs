//! Object storage layer
//!
//! The repository talks to object storage only through [`ObjectStore`]. Two
//! implementations are provided: [`S3Client`], backed by `rust-s3`, and
//! [`InMemoryStore`] for local runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::config::{CannedAcl, ServerSideEncryption, StorageClass};

pub mod memory;
pub mod s3_client;

pub use memory::*;
pub use s3_client::*;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("S3 {operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },

    #[error("No such object s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid S3 credentials: {0}")]
    Credentials(String),
}

impl StoreError {
    pub fn service(operation: &'static str, message: impl ToString) -> Self {
        Self::Service {
            operation,
            message: message.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Readable object body, downloaded or about to be uploaded.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// One page of a delimited listing request.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    /// Continuation marker returned by the previous page.
    pub marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Key prefixes rolled up by the delimiter ("directories").
    pub common_prefixes: Vec<String>,
    pub objects: Vec<ObjectSummary>,
    /// Present while more pages remain.
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_length: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Upload of a single object with its write-policy tagging. The body is
/// streamed to the store.
pub struct PutRequest {
    pub bucket: String,
    pub key: String,
    pub body: ObjectBody,
    pub content_length: u64,
    pub content_type: String,
    pub storage_class: StorageClass,
    pub acl: Option<CannedAcl>,
    pub server_side_encryption: Option<ServerSideEncryption>,
}

impl std::fmt::Debug for PutRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("storage_class", &self.storage_class)
            .field("acl", &self.acl)
            .field("server_side_encryption", &self.server_side_encryption)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()>;

    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListingPage>;

    /// Exact-key existence check.
    async fn object_exists(&self, bucket: &str, key: &str) -> StoreResult<bool>;

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectMetadata>;

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody>;

    async fn put_object(&self, request: PutRequest) -> StoreResult<()>;
}
