// S3 client backed by rust-s3

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use s3::bucket_ops::BucketConfiguration;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::Bucket;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{
    ListRequest, ListingPage, ObjectBody, ObjectMetadata, ObjectStore, ObjectSummary, PutRequest,
    StoreError, StoreResult,
};
use crate::config::{ConnectionConfig, CredentialsSource};

#[derive(Clone)]
pub struct S3Client {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Client {
    pub fn new(connection: &ConnectionConfig) -> StoreResult<Self> {
        let region = match &connection.endpoint {
            Some(endpoint) => Region::Custom {
                region: connection.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => connection
                .region
                .parse()
                .map_err(|e| StoreError::service("resolve region", e))?,
        };

        Ok(Self {
            region,
            credentials: resolve_credentials(&connection.credentials)?,
            path_style: connection.path_style,
        })
    }

    fn bucket(&self, name: &str) -> StoreResult<Bucket> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| StoreError::service("open bucket", e))?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

fn resolve_credentials(source: &CredentialsSource) -> StoreResult<Credentials> {
    let credentials = match source {
        CredentialsSource::Static {
            access_key,
            secret_key,
            session_token,
        } => Credentials::new(
            Some(access_key.as_str()),
            Some(secret_key.as_str()),
            None,
            session_token.as_deref(),
            None,
        ),
        CredentialsSource::Profile { name } => Credentials::from_profile(Some(name.as_str())),
        CredentialsSource::Environment => Credentials::default(),
        CredentialsSource::Anonymous => Credentials::anonymous(),
    };
    credentials.map_err(|e| StoreError::Credentials(e.to_string()))
}

/// Adapts a response body stream to [`ObjectBody`] without buffering it.
fn stream_body<S>(stream: S) -> ObjectBody
where
    S: Stream<Item = Result<Bytes, S3Error>> + Send + Unpin + 'static,
{
    Box::new(StreamReader::new(stream.map_err(io::Error::other)))
}

fn not_found(error: &S3Error) -> bool {
    matches!(error, S3Error::HttpFailWithBody(404, _))
}

fn object_error(operation: &'static str, bucket: &str, key: &str, error: S3Error) -> StoreError {
    if not_found(&error) {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StoreError::service(operation, error)
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        // A bucket owned by someone else answers 403, which still means it exists.
        match self.bucket(bucket)?.location().await {
            Ok(_) => Ok(true),
            Err(e) if not_found(&e) => Ok(false),
            Err(S3Error::HttpFailWithBody(403, _)) => Ok(true),
            Err(e) => Err(StoreError::service("check bucket", e)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        let config = BucketConfiguration::default();
        let created = if self.path_style {
            Bucket::create_with_path_style(bucket, self.region.clone(), self.credentials.clone(), config)
                .await
        } else {
            Bucket::create(bucket, self.region.clone(), self.credentials.clone(), config).await
        }
        .map_err(|e| StoreError::service("create bucket", e))?;

        if !created.success() {
            return Err(StoreError::service(
                "create bucket",
                format!("HTTP {}: {}", created.response_code, created.response_text),
            ));
        }
        debug!("Created bucket {}", bucket);
        Ok(())
    }

    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListingPage> {
        let (result, _status) = self
            .bucket(&request.bucket)?
            .list_page(
                request.prefix.clone(),
                request.delimiter.clone(),
                request.marker.clone(),
                None,
                None,
            )
            .await
            .map_err(|e| StoreError::service("list objects", e))?;

        Ok(ListingPage {
            common_prefixes: result
                .common_prefixes
                .unwrap_or_default()
                .into_iter()
                .map(|common| common.prefix)
                .collect(),
            objects: result
                .contents
                .into_iter()
                .map(|object| ObjectSummary {
                    key: object.key,
                    size: object.size,
                })
                .collect(),
            next_marker: result.next_continuation_token.filter(|_| result.is_truncated),
        })
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        // The key itself sorts first among all keys it prefixes.
        let (result, _status) = self
            .bucket(bucket)?
            .list_page(key.to_string(), None, None, None, Some(1))
            .await
            .map_err(|e| StoreError::service("list objects", e))?;
        Ok(result.contents.first().is_some_and(|object| object.key == key))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectMetadata> {
        let (head, _status) = self
            .bucket(bucket)?
            .head_object(key)
            .await
            .map_err(|e| object_error("head object", bucket, key, e))?;

        Ok(ObjectMetadata {
            content_length: head.content_length.unwrap_or_default().max(0) as u64,
            last_modified: head
                .last_modified
                .as_deref()
                .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
                .map(|value| value.with_timezone(&Utc)),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
        let response = self
            .bucket(bucket)?
            .get_object_stream(key)
            .await
            .map_err(|e| object_error("get object", bucket, key, e))?;
        Ok(stream_body(response.bytes))
    }

    async fn put_object(&self, mut request: PutRequest) -> StoreResult<()> {
        let mut bucket = self.bucket(&request.bucket)?;
        bucket.add_header("x-amz-storage-class", request.storage_class.as_str());
        if let Some(acl) = request.acl {
            bucket.add_header("x-amz-acl", acl.as_str());
        }
        if let Some(sse) = request.server_side_encryption {
            bucket.add_header("x-amz-server-side-encryption", sse.as_str());
        }

        let response = bucket
            .put_object_stream_with_content_type(
                &mut request.body,
                &request.key,
                &request.content_type,
            )
            .await
            .map_err(|e| StoreError::service("put object", e))?;
        debug!(
            "Uploaded {} bytes to s3://{}/{} (HTTP {})",
            request.content_length,
            request.bucket,
            request.key,
            response.status_code()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(endpoint: Option<&str>) -> ConnectionConfig {
        ConnectionConfig {
            region: "eu-west-1".to_string(),
            endpoint: endpoint.map(str::to_string),
            path_style: endpoint.is_some(),
            credentials: CredentialsSource::Static {
                access_key: "AKIDEXAMPLE".to_string(),
                secret_key: "secret".to_string(),
                session_token: None,
            },
        }
    }

    #[test]
    fn test_named_region() {
        let client = S3Client::new(&connection(None)).unwrap();
        assert_eq!(client.region, Region::EuWest1);
        assert!(!client.path_style);
    }

    #[test]
    fn test_custom_endpoint() {
        let client = S3Client::new(&connection(Some("http://localhost:9000"))).unwrap();
        assert_eq!(
            client.region,
            Region::Custom {
                region: "eu-west-1".to_string(),
                endpoint: "http://localhost:9000".to_string(),
            }
        );
        assert!(client.path_style);
    }

    #[tokio::test]
    async fn test_stream_body_reads_chunks_in_order() {
        use tokio::io::AsyncReadExt;

        let chunks = vec![
            Ok(Bytes::from_static(b"first ")),
            Ok(Bytes::from_static(b"second")),
        ];
        let mut body = stream_body(futures::stream::iter(chunks));
        let mut content = String::new();
        body.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "first second");
    }

    #[tokio::test]
    async fn test_stream_body_surfaces_transport_errors() {
        use tokio::io::AsyncReadExt;

        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(S3Error::HttpFailWithBody(500, "reset".to_string())),
        ];
        let mut body = stream_body(futures::stream::iter(chunks));
        let mut content = Vec::new();
        let err = body.read_to_end(&mut content).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(content, b"partial");
    }

    #[test]
    fn test_static_credentials() {
        let client = S3Client::new(&connection(None)).unwrap();
        assert_eq!(client.credentials.access_key.as_deref(), Some("AKIDEXAMPLE"));
        assert_eq!(client.credentials.secret_key.as_deref(), Some("secret"));
    }
}
