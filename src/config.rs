use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub connection: ConnectionConfig,
    pub write_policy: WritePolicy,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub path_style: bool,
    pub credentials: CredentialsSource,
}

/// Upload policy, fixed for the lifetime of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WritePolicy {
    pub overwrite: bool,
    pub acl: Option<CannedAcl>,
    pub server_side_encryption: bool,
    pub storage_class: StorageClass,
}

impl WritePolicy {
    pub fn new(overwrite: bool) -> Self {
        Self {
            overwrite,
            ..Self::default()
        }
    }

    pub fn sse(&self) -> Option<ServerSideEncryption> {
        self.server_side_encryption.then_some(ServerSideEncryption::Aes256)
    }
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            overwrite: false,
            acl: Some(CannedAcl::PublicRead),
            server_side_encryption: false,
            storage_class: StorageClass::Standard,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl BootstrapConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.attempts, Duration::from_secs(self.delay_secs))
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_secs: 20,
        }
    }
}

/// Where S3 credentials come from. Resolved by the storage client.
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialsSource {
    Static {
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
    },
    Profile {
        name: String,
    },
    /// Environment variables, then profile, then instance metadata.
    #[default]
    Environment,
    Anonymous,
}

impl fmt::Debug for CredentialsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { access_key, .. } => f
                .debug_struct("Static")
                .field("access_key", access_key)
                .finish_non_exhaustive(),
            Self::Profile { name } => f.debug_struct("Profile").field("name", name).finish(),
            Self::Environment => f.write_str("Environment"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum CannedAcl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    AwsExecRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
    LogDeliveryWrite,
}

impl CannedAcl {
    /// Value of the `x-amz-acl` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
            Self::AuthenticatedRead => "authenticated-read",
            Self::AwsExecRead => "aws-exec-read",
            Self::BucketOwnerRead => "bucket-owner-read",
            Self::BucketOwnerFullControl => "bucket-owner-full-control",
            Self::LogDeliveryWrite => "log-delivery-write",
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CannedAcl {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "public-read" => Ok(Self::PublicRead),
            "public-read-write" => Ok(Self::PublicReadWrite),
            "authenticated-read" => Ok(Self::AuthenticatedRead),
            "aws-exec-read" => Ok(Self::AwsExecRead),
            "bucket-owner-read" => Ok(Self::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(Self::BucketOwnerFullControl),
            "log-delivery-write" => Ok(Self::LogDeliveryWrite),
            other => Err(format!("unknown canned ACL '{other}'")),
        }
    }
}

impl TryFrom<String> for CannedAcl {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum StorageClass {
    #[default]
    Standard,
    ReducedRedundancy,
    StandardIa,
    OnezoneIa,
    IntelligentTiering,
    Glacier,
    GlacierIr,
    DeepArchive,
}

impl StorageClass {
    /// Value of the `x-amz-storage-class` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
            Self::StandardIa => "STANDARD_IA",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::Glacier => "GLACIER",
            Self::GlacierIr => "GLACIER_IR",
            Self::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "STANDARD" => Ok(Self::Standard),
            "REDUCED_REDUNDANCY" => Ok(Self::ReducedRedundancy),
            "STANDARD_IA" => Ok(Self::StandardIa),
            "ONEZONE_IA" => Ok(Self::OnezoneIa),
            "INTELLIGENT_TIERING" => Ok(Self::IntelligentTiering),
            "GLACIER" => Ok(Self::Glacier),
            "GLACIER_IR" => Ok(Self::GlacierIr),
            "DEEP_ARCHIVE" => Ok(Self::DeepArchive),
            other => Err(format!("unknown storage class '{other}'")),
        }
    }
}

impl TryFrom<String> for StorageClass {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ServerSideEncryption {
    Aes256,
}

impl ServerSideEncryption {
    /// Value of the `x-amz-server-side-encryption` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256 => "AES256",
        }
    }
}

impl RepositoryConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let credentials = match (
            env::var("AWS_ACCESS_KEY_ID").ok(),
            env::var("AWS_SECRET_ACCESS_KEY").ok(),
            env::var("AWS_PROFILE").ok(),
        ) {
            (Some(access_key), Some(secret_key), _) => CredentialsSource::Static {
                access_key,
                secret_key,
                session_token: env::var("AWS_SESSION_TOKEN").ok(),
            },
            (_, _, Some(name)) => CredentialsSource::Profile { name },
            _ => CredentialsSource::Environment,
        };

        let acl = match env::var("S3_ACL") {
            Ok(value) if value.eq_ignore_ascii_case("none") => None,
            Ok(value) => Some(value.parse::<CannedAcl>().map_err(anyhow::Error::msg).context("S3_ACL")?),
            Err(_) => Some(CannedAcl::PublicRead),
        };

        Ok(Self {
            connection: ConnectionConfig {
                region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: env::var("S3_ENDPOINT").ok(),
                path_style: env::var("S3_PATH_STYLE")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .context("S3_PATH_STYLE")?,
                credentials,
            },
            write_policy: WritePolicy {
                overwrite: env::var("S3_OVERWRITE")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .context("S3_OVERWRITE")?,
                acl,
                server_side_encryption: env::var("S3_SERVER_SIDE_ENCRYPTION")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .context("S3_SERVER_SIDE_ENCRYPTION")?,
                storage_class: env::var("S3_STORAGE_CLASS")
                    .unwrap_or_else(|_| "STANDARD".to_string())
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("S3_STORAGE_CLASS")?,
            },
            bootstrap: BootstrapConfig {
                attempts: env::var("S3_BUCKET_BOOTSTRAP_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("S3_BUCKET_BOOTSTRAP_ATTEMPTS")?,
                delay_secs: env::var("S3_BUCKET_BOOTSTRAP_DELAY_SECS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .context("S3_BUCKET_BOOTSTRAP_DELAY_SECS")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialises tests that touch the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "S3_REGION",
        "S3_ENDPOINT",
        "S3_PATH_STYLE",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_SESSION_TOKEN",
        "AWS_PROFILE",
        "S3_OVERWRITE",
        "S3_ACL",
        "S3_SERVER_SIDE_ENCRYPTION",
        "S3_STORAGE_CLASS",
        "S3_BUCKET_BOOTSTRAP_ATTEMPTS",
        "S3_BUCKET_BOOTSTRAP_DELAY_SECS",
    ];

    /// Runs `f` with exactly `vars` set among the repository variables, then
    /// restores whatever was there before.
    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let saved: Vec<_> = VARS.iter().map(|name| (*name, env::var(name).ok())).collect();

        for name in VARS {
            env::remove_var(name);
        }
        for (name, value) in vars {
            env::set_var(name, value);
        }

        let result = f();

        for (name, value) in saved {
            match value {
                Some(value) => env::set_var(name, value),
                None => env::remove_var(name),
            }
        }
        result
    }

    #[test]
    fn test_from_env_defaults() {
        let config = with_env(&[], RepositoryConfig::from_env).unwrap();

        assert_eq!(config.connection.region, "us-east-1");
        assert_eq!(config.connection.endpoint, None);
        assert!(!config.connection.path_style);
        assert!(matches!(
            config.connection.credentials,
            CredentialsSource::Environment
        ));
        assert!(!config.write_policy.overwrite);
        assert_eq!(config.write_policy.acl, Some(CannedAcl::PublicRead));
        assert_eq!(config.write_policy.storage_class, StorageClass::Standard);
        assert_eq!(config.bootstrap.retry_policy(), RetryPolicy::bucket_bootstrap());
    }

    #[test]
    fn test_from_env_reads_every_setting() {
        let config = with_env(
            &[
                ("S3_REGION", "eu-west-1"),
                ("S3_ENDPOINT", "http://localhost:9000"),
                ("S3_PATH_STYLE", "true"),
                ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("AWS_SESSION_TOKEN", "token"),
                ("AWS_PROFILE", "ignored"),
                ("S3_OVERWRITE", "true"),
                ("S3_ACL", "none"),
                ("S3_SERVER_SIDE_ENCRYPTION", "true"),
                ("S3_STORAGE_CLASS", "STANDARD_IA"),
                ("S3_BUCKET_BOOTSTRAP_ATTEMPTS", "3"),
                ("S3_BUCKET_BOOTSTRAP_DELAY_SECS", "0"),
            ],
            RepositoryConfig::from_env,
        )
        .unwrap();

        assert_eq!(config.connection.region, "eu-west-1");
        assert_eq!(
            config.connection.endpoint.as_deref(),
            Some("http://localhost:9000")
        );
        assert!(config.connection.path_style);
        match &config.connection.credentials {
            CredentialsSource::Static {
                access_key,
                secret_key,
                session_token,
            } => {
                assert_eq!(access_key, "AKIDEXAMPLE");
                assert_eq!(secret_key, "secret");
                assert_eq!(session_token.as_deref(), Some("token"));
            }
            other => panic!("expected static credentials, got {other:?}"),
        }
        assert!(config.write_policy.overwrite);
        assert_eq!(config.write_policy.acl, None);
        assert_eq!(config.write_policy.sse(), Some(ServerSideEncryption::Aes256));
        assert_eq!(config.write_policy.storage_class, StorageClass::StandardIa);
        assert_eq!(config.bootstrap.retry_policy(), RetryPolicy::immediate(3));
    }

    #[test]
    fn test_from_env_uses_profile_without_static_keys() {
        let config = with_env(
            &[("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"), ("AWS_PROFILE", "ci")],
            RepositoryConfig::from_env,
        )
        .unwrap();

        assert!(matches!(
            config.connection.credentials,
            CredentialsSource::Profile { ref name } if name == "ci"
        ));
    }

    #[test]
    fn test_from_env_names_the_bad_variable() {
        let err = with_env(&[("S3_OVERWRITE", "sometimes")], RepositoryConfig::from_env)
            .unwrap_err();
        assert_eq!(err.to_string(), "S3_OVERWRITE");

        let err = with_env(&[("S3_ACL", "world-writable")], RepositoryConfig::from_env)
            .unwrap_err();
        assert_eq!(err.to_string(), "S3_ACL");
        assert!(format!("{err:#}").contains("world-writable"));
    }

    #[test]
    fn test_write_policy_defaults() {
        let policy = WritePolicy::default();
        assert!(!policy.overwrite);
        assert_eq!(policy.acl, Some(CannedAcl::PublicRead));
        assert!(!policy.server_side_encryption);
        assert_eq!(policy.storage_class, StorageClass::Standard);
        assert_eq!(policy.sse(), None);
    }

    #[test]
    fn test_sse_flag() {
        let policy = WritePolicy {
            server_side_encryption: true,
            ..WritePolicy::new(true)
        };
        assert_eq!(policy.sse().map(|sse| sse.as_str()), Some("AES256"));
    }

    #[test]
    fn test_acl_parsing() {
        assert_eq!("public-read".parse::<CannedAcl>(), Ok(CannedAcl::PublicRead));
        assert_eq!(
            "Bucket-Owner-Full-Control".parse::<CannedAcl>(),
            Ok(CannedAcl::BucketOwnerFullControl)
        );
        assert!("world-writable".parse::<CannedAcl>().is_err());
        assert_eq!(CannedAcl::AuthenticatedRead.to_string(), "authenticated-read");
    }

    #[test]
    fn test_storage_class_parsing() {
        assert_eq!("standard".parse::<StorageClass>(), Ok(StorageClass::Standard));
        assert_eq!("standard-ia".parse::<StorageClass>(), Ok(StorageClass::StandardIa));
        assert_eq!(
            "REDUCED_REDUNDANCY".parse::<StorageClass>(),
            Ok(StorageClass::ReducedRedundancy)
        );
        assert!("cold".parse::<StorageClass>().is_err());
        assert_eq!(StorageClass::DeepArchive.to_string(), "DEEP_ARCHIVE");
    }

    #[test]
    fn test_bootstrap_defaults() {
        let policy = BootstrapConfig::default().retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(20));
    }

    #[test]
    fn test_static_credentials_debug_hides_secret() {
        let source = CredentialsSource::Static {
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "very-secret".to_string(),
            session_token: None,
        };
        let rendered = format!("{source:?}");
        assert!(rendered.contains("AKIDEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
    }
}
