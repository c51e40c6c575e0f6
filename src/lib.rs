// S3 dependency repository - resolve and publish build artifacts in object storage

pub mod address;
pub mod config;
pub mod repository;
pub mod resolver;
pub mod storage;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::{RepositoryConfig, WritePolicy};
pub use repository::{Repository, S3Repository, S3Resource};
pub use resolver::S3Resolver;
pub use types::{RepoResult, RepositoryError};
