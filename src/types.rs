use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("'{address}' is a malformed S3 URI: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Transfer of {resource} to {destination} failed: {source}")]
    TransferFailed {
        resource: String,
        destination: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} exists but overwriting is disabled")]
    DestinationExists(String),

    #[error("Couldn't create bucket {bucket} after {attempts} attempts")]
    BucketBootstrapFailed { bucket: String, attempts: u32 },

    #[error("S3 service error while {context}: {source}")]
    Service {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepositoryError {
    pub(crate) fn invalid_address(address: &str, reason: impl ToString) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;
