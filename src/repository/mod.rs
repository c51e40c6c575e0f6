//! S3 backed dependency repository
//!
//! Implements the three repository verbs against an [`ObjectStore`]:
//!
//! - `list`: delimited listing of a prefix, directories first, across all pages
//! - `fetch`: download through a cached [`S3Resource`] with transfer events
//! - `store`: upload under the repository's [`WritePolicy`]
//!
//! ## Upload protocol
//!
//! 1. Missing buckets are created, retrying under the bootstrap policy
//!    (5 attempts, 20 seconds apart by default).
//! 2. With overwriting disabled, an existing object at the key aborts the
//!    upload before anything is written.
//! 3. The object is written with the configured storage class and ACL, plus
//!    AES256 server-side encryption when enabled.
//!
//! Steps 1-3 are not atomic. Another writer can create the object between the
//! existence check and the upload.

pub mod events;
pub mod resource;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::address::{self, ObjectAddress};
use crate::config::{RepositoryConfig, WritePolicy};
use crate::storage::{ListRequest, ObjectStore, PutRequest, S3Client, StoreError};
use crate::types::{RepoResult, RepositoryError};
use crate::utils::{with_retry, RetryPolicy};

pub use events::{
    LoggingListener, Notifier, RequestType, TransferEvent, TransferEventKind, TransferListener,
};
pub use resource::{ResourceCache, S3Resource};

const DELIMITER: &str = "/";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// The verbs a dependency resolver needs from a repository.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Immediate children of `parent`: common prefixes first, then keys.
    async fn list(&self, parent: &str) -> RepoResult<Vec<String>>;

    /// Downloads `source` into the file at `destination`.
    async fn fetch(&self, source: &str, destination: &Path) -> RepoResult<()>;

    /// Uploads the file at `source` to `destination`.
    async fn store(&self, source: &Path, destination: &str, overwrite: bool) -> RepoResult<()>;
}

pub struct S3Repository {
    client: Arc<dyn ObjectStore>,
    policy: WritePolicy,
    bootstrap: RetryPolicy,
    resources: ResourceCache,
    notifier: Notifier,
}

impl S3Repository {
    /// Repository with the default write policy: public-read ACL, standard
    /// storage class, no server-side encryption.
    pub fn new(client: Arc<dyn ObjectStore>, overwrite: bool) -> Self {
        Self::with_policy(client, WritePolicy::new(overwrite))
    }

    pub fn with_policy(client: Arc<dyn ObjectStore>, policy: WritePolicy) -> Self {
        let mut notifier = Notifier::new();
        notifier.add_listener(Arc::new(LoggingListener));

        Self {
            resources: ResourceCache::new(Arc::clone(&client)),
            client,
            policy,
            bootstrap: RetryPolicy::bucket_bootstrap(),
            notifier,
        }
    }

    /// Repository talking to S3 with the given configuration.
    pub fn from_config(config: &RepositoryConfig) -> RepoResult<Self> {
        let client = S3Client::new(&config.connection)?;
        Ok(Self::with_policy(Arc::new(client), config.write_policy.clone())
            .with_bootstrap_policy(config.bootstrap.retry_policy()))
    }

    pub fn with_bootstrap_policy(mut self, bootstrap: RetryPolicy) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransferListener>) -> Self {
        self.notifier.add_listener(listener);
        self
    }

    pub fn policy(&self) -> &WritePolicy {
        &self.policy
    }

    pub fn client(&self) -> &Arc<dyn ObjectStore> {
        &self.client
    }

    /// Cached handle for `source`.
    pub fn resource(&self, source: &str) -> RepoResult<Arc<S3Resource>> {
        self.resources.resolve(source)
    }

    async fn copy_to(&self, resource: &S3Resource, destination: &Path) -> RepoResult<()> {
        let total = resource.content_length().await?;
        let mut stream = resource.open_stream().await?;

        let transfer_failed = |source| RepositoryError::TransferFailed {
            resource: resource.name().to_string(),
            destination: destination.display().to_string(),
            source,
        };

        let mut file = File::create(destination).await.map_err(transfer_failed)?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut transferred = 0u64;
        loop {
            let read = stream.read(&mut buffer).await.map_err(transfer_failed)?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .await
                .map_err(transfer_failed)?;
            transferred += read as u64;
            self.notifier.transfer_progress(
                resource.name(),
                RequestType::Get,
                read as u64,
                transferred,
                total,
            );
        }
        file.flush().await.map_err(transfer_failed)?;
        Ok(())
    }

    async fn upload(
        &self,
        source: &Path,
        name: &str,
        destination: &ObjectAddress,
        overwrite: bool,
    ) -> RepoResult<u64> {
        if overwrite != self.policy.overwrite {
            debug!(
                "Overwrite flag {} for {} ignored, repository policy is {}",
                overwrite, name, self.policy.overwrite
            );
        }

        if !self.client.bucket_exists(&destination.bucket).await?
            && !self.create_bucket(&destination.bucket).await
        {
            return Err(RepositoryError::BucketBootstrapFailed {
                bucket: destination.bucket.clone(),
                attempts: self.bootstrap.max_attempts,
            });
        }

        if !self.policy.overwrite
            && self
                .client
                .object_exists(&destination.bucket, &destination.key)
                .await?
        {
            return Err(RepositoryError::DestinationExists(name.to_string()));
        }

        let transfer_failed = |e| RepositoryError::TransferFailed {
            resource: source.display().to_string(),
            destination: name.to_string(),
            source: e,
        };
        let file = File::open(source).await.map_err(transfer_failed)?;
        let length = file.metadata().await.map_err(transfer_failed)?.len();

        let request = PutRequest {
            bucket: destination.bucket.clone(),
            key: destination.key.clone(),
            body: Box::new(file),
            content_length: length,
            content_type: mime_guess::from_path(&destination.key)
                .first_or_octet_stream()
                .to_string(),
            storage_class: self.policy.storage_class,
            acl: self.policy.acl,
            server_side_encryption: self.policy.sse(),
        };
        self.client.put_object(request).await?;

        if let Some(resource) = self.resources.get(name) {
            resource.invalidate().await;
        }
        Ok(length)
    }

    /// Creates `bucket` and confirms it exists, retrying under the bootstrap
    /// policy. Returns whether the bucket could be confirmed.
    async fn create_bucket(&self, bucket: &str) -> bool {
        info!("Bucket {} does not exist, creating it", bucket);

        with_retry(&self.bootstrap, |attempt| {
            async move {
                debug!("Creating bucket {} (attempt {})", bucket, attempt);
                self.client.create_bucket(bucket).await?;
                let exists = self.client.bucket_exists(bucket).await?;
                Ok::<_, StoreError>(exists.then_some(()))
            }
            .boxed()
        })
        .await
        .is_some()
    }
}

#[async_trait]
impl Repository for S3Repository {
    async fn list(&self, parent: &str) -> RepoResult<Vec<String>> {
        let location = ObjectAddress::parse(parent)?;
        let mut request = ListRequest {
            bucket: location.bucket,
            prefix: location.key,
            delimiter: Some(DELIMITER.to_string()),
            marker: None,
        };

        let mut keys = Vec::new();
        loop {
            let page = self
                .client
                .list_page(&request)
                .await
                .map_err(|source| RepositoryError::Service {
                    context: format!("listing {parent}"),
                    source,
                })?;

            keys.extend(page.common_prefixes);
            keys.extend(page.objects.into_iter().map(|object| object.key));

            match page.next_marker {
                Some(marker) => request.marker = Some(marker),
                None => break,
            }
        }

        debug!("Listed {} entries under {}", keys.len(), parent);
        Ok(keys)
    }

    async fn fetch(&self, source: &str, destination: &Path) -> RepoResult<()> {
        let resource = self.resource(source)?;
        self.notifier
            .transfer_initiated(resource.name(), RequestType::Get);

        let outcome = self.copy_to(&resource, destination).await;
        if let Err(error) = &outcome {
            self.notifier
                .transfer_error(resource.name(), RequestType::Get, error);
        }

        let total = resource.known_content_length().await;
        self.notifier
            .transfer_completed(resource.name(), RequestType::Get, total);
        outcome
    }

    async fn store(&self, source: &Path, destination: &str, overwrite: bool) -> RepoResult<()> {
        let name = address::normalize(destination)?;
        let location = ObjectAddress::parse(&name)?;
        self.notifier.transfer_initiated(&name, RequestType::Put);

        let outcome = self.upload(source, &name, &location, overwrite).await;
        let total = match &outcome {
            Ok(length) => *length,
            Err(error) => {
                self.notifier.transfer_error(&name, RequestType::Put, error);
                0
            }
        };

        self.notifier
            .transfer_completed(&name, RequestType::Put, total);
        outcome.map(|_| ())
    }
}
