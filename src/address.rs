//! Repository addresses
//!
//! Artifacts are named by URIs of the form `s3://bucket-name/key/path`. The
//! authority is the bucket, the path (minus its leading `/`) is the object key.
//! Addresses are normalised before they are split: repeated separators collapse
//! and `.`/`..` segments are resolved, so equivalent spellings of a path land on
//! the same object key.

use std::borrow::Cow;
use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::types::{RepoResult, RepositoryError};

/// A bucket/key pair derived from a repository address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectAddress {
    pub bucket: String,
    pub key: String,
}

impl ObjectAddress {
    /// Parses and normalises `address` into its bucket and key.
    pub fn parse(address: &str) -> RepoResult<Self> {
        let url = parse_normalized(address)?;
        Ok(Self {
            bucket: bucket_of(&url, address)?,
            key: key_of(&url, address)?,
        })
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Returns the normalised textual form of `address`.
pub fn normalize(address: &str) -> RepoResult<String> {
    parse_normalized(address).map(String::from)
}

/// Parses the S3 bucket from a properly formed S3 URI.
pub fn to_container(address: &str) -> RepoResult<String> {
    let url = parse_normalized(address)?;
    bucket_of(&url, address)
}

/// Parses the S3 key name from a properly formed S3 URI.
pub fn to_key(address: &str) -> RepoResult<String> {
    let url = parse_normalized(address)?;
    key_of(&url, address)
}

fn parse_normalized(address: &str) -> RepoResult<Url> {
    if let Some(bad) = address.chars().find(|c| !is_uri_char(*c)) {
        return Err(RepositoryError::invalid_address(
            address,
            format!("illegal character {bad:?}"),
        ));
    }
    check_percent_escapes(address)?;

    // `url` resolves dot segments while parsing; separators have to be collapsed
    // first so that `a//../b` resolves against `a/../b`.
    let collapsed = collapse_separators(address);
    let url = Url::parse(&collapsed).map_err(|e| RepositoryError::invalid_address(address, e))?;

    if url.cannot_be_a_base() {
        return Err(RepositoryError::invalid_address(address, "missing '//' authority"));
    }
    Ok(url)
}

fn bucket_of(url: &Url, address: &str) -> RepoResult<String> {
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(RepositoryError::invalid_address(address, "no bucket in authority")),
    }
}

fn key_of(url: &Url, address: &str) -> RepoResult<String> {
    let path = url.path();
    let path = path.strip_prefix('/').unwrap_or(path);
    percent_decode_str(path)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|e| RepositoryError::invalid_address(address, e))
}

/// Collapses runs of `/` inside the path component, leaving the scheme's `//`,
/// the query and the fragment untouched.
fn collapse_separators(address: &str) -> Cow<'_, str> {
    let Some(scheme_end) = address.find("://") else {
        return Cow::Borrowed(address);
    };
    let authority_start = scheme_end + 3;
    let path_start = match address[authority_start..].find(['/', '?', '#']) {
        Some(offset) if address[authority_start + offset..].starts_with('/') => {
            authority_start + offset
        }
        _ => return Cow::Borrowed(address),
    };
    let path_end = address[path_start..]
        .find(['?', '#'])
        .map_or(address.len(), |offset| path_start + offset);

    let path = &address[path_start..path_end];
    if !path.contains("//") {
        return Cow::Borrowed(address);
    }

    let mut out = String::with_capacity(address.len());
    out.push_str(&address[..path_start]);
    let mut previous_was_separator = false;
    for c in path.chars() {
        if c == '/' && previous_was_separator {
            continue;
        }
        previous_was_separator = c == '/';
        out.push(c);
    }
    out.push_str(&address[path_end..]);
    Cow::Owned(out)
}

// RFC 3986 unreserved + reserved characters, plus `%` for escapes. Anything
// outside ASCII has to arrive percent-encoded.
fn is_uri_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~:/?#[]@!$&'()*+,;=%".contains(c)
}

fn check_percent_escapes(address: &str) -> RepoResult<()> {
    let bytes = address.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                return Err(RepositoryError::invalid_address(
                    address,
                    format!("malformed escape at index {i}"),
                ));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}
