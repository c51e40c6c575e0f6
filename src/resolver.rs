//! Named resolver over an S3 repository
//!
//! Maps module coordinates onto repository addresses through Ivy-style
//! patterns (`[organisation]/[module]/[revision]/...`) relative to a root
//! address such as `s3://my-bucket/releases`.
//!
//! Several patterns may be configured. Publishing always uses the first one;
//! downloads try each pattern in order and listings merge all of them.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::address::ObjectAddress;
use crate::config::{RepositoryConfig, WritePolicy};
use crate::repository::{Repository, S3Repository};
use crate::storage::{ObjectStore, StoreError};
use crate::types::{RepoResult, RepositoryError};

pub const DEFAULT_IVY_PATTERN: &str = "[organisation]/[module]/[revision]/ivys/ivy.xml";
pub const DEFAULT_ARTIFACT_PATTERN: &str =
    "[organisation]/[module]/[revision]/[type]s/[artifact]-[revision].[ext]";

const REVISION_TOKEN: &str = "[revision]";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRevision {
    pub organisation: String,
    pub module: String,
    pub revision: String,
}

impl ModuleRevision {
    pub fn new(organisation: &str, module: &str, revision: &str) -> Self {
        Self {
            organisation: organisation.to_string(),
            module: module.to_string(),
            revision: revision.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    pub name: String,
    pub kind: String,
    pub ext: String,
}

impl Artifact {
    pub fn new(name: &str, kind: &str, ext: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            ext: ext.to_string(),
        }
    }

    /// The main jar of a module.
    pub fn jar(module: &str) -> Self {
        Self::new(module, "jar", "jar")
    }
}

pub struct S3Resolver<R = S3Repository> {
    name: String,
    root: String,
    repository: Arc<R>,
    ivy_patterns: Vec<String>,
    artifact_patterns: Vec<String>,
    m2_compatible: bool,
}

impl S3Resolver<S3Repository> {
    pub fn new(name: &str, root: &str, client: Arc<dyn ObjectStore>, overwrite: bool) -> Self {
        Self::with_repository(name, root, Arc::new(S3Repository::new(client, overwrite)))
    }

    pub fn with_policy(
        name: &str,
        root: &str,
        client: Arc<dyn ObjectStore>,
        policy: WritePolicy,
    ) -> Self {
        Self::with_repository(name, root, Arc::new(S3Repository::with_policy(client, policy)))
    }

    pub fn from_config(name: &str, root: &str, config: &RepositoryConfig) -> RepoResult<Self> {
        Ok(Self::with_repository(
            name,
            root,
            Arc::new(S3Repository::from_config(config)?),
        ))
    }
}

impl<R: Repository> S3Resolver<R> {
    pub fn with_repository(name: &str, root: &str, repository: Arc<R>) -> Self {
        Self {
            name: name.to_string(),
            root: root.trim_end_matches('/').to_string(),
            repository,
            ivy_patterns: vec![DEFAULT_IVY_PATTERN.to_string()],
            artifact_patterns: vec![DEFAULT_ARTIFACT_PATTERN.to_string()],
            m2_compatible: false,
        }
    }

    /// Replaces the configured patterns with a single pair.
    pub fn with_patterns(mut self, ivy_pattern: &str, artifact_pattern: &str) -> Self {
        self.ivy_patterns = vec![ivy_pattern.to_string()];
        self.artifact_patterns = vec![artifact_pattern.to_string()];
        self
    }

    pub fn add_ivy_pattern(mut self, pattern: &str) -> Self {
        self.ivy_patterns.push(pattern.to_string());
        self
    }

    pub fn add_artifact_pattern(mut self, pattern: &str) -> Self {
        self.artifact_patterns.push(pattern.to_string());
        self
    }

    pub fn ivy_patterns(&self) -> &[String] {
        &self.ivy_patterns
    }

    pub fn artifact_patterns(&self) -> &[String] {
        &self.artifact_patterns
    }

    /// Maven layout: dots in the organisation become directories.
    pub fn with_m2_compatible(mut self, m2_compatible: bool) -> Self {
        self.m2_compatible = m2_compatible;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        "s3"
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    fn organisation_path(&self, organisation: &str) -> String {
        if self.m2_compatible {
            organisation.replace('.', "/")
        } else {
            organisation.to_string()
        }
    }

    fn address(&self, relative: &str) -> String {
        format!("{}/{}", self.root, relative)
    }

    pub fn ivy_address(&self, module: &ModuleRevision) -> String {
        let organisation = self.organisation_path(&module.organisation);
        self.address(&substitute(
            primary(&self.ivy_patterns, DEFAULT_IVY_PATTERN),
            &[
                ("organisation", organisation.as_str()),
                ("module", module.module.as_str()),
                ("revision", module.revision.as_str()),
                ("artifact", "ivy"),
                ("type", "ivy"),
                ("ext", "xml"),
            ],
        ))
    }

    /// Address `artifact` is published to.
    pub fn artifact_address(&self, module: &ModuleRevision, artifact: &Artifact) -> String {
        self.artifact_address_with(
            primary(&self.artifact_patterns, DEFAULT_ARTIFACT_PATTERN),
            module,
            artifact,
        )
    }

    /// Candidate addresses of `artifact`, one per artifact pattern.
    pub fn artifact_addresses(&self, module: &ModuleRevision, artifact: &Artifact) -> Vec<String> {
        self.artifact_patterns
            .iter()
            .map(|pattern| self.artifact_address_with(pattern, module, artifact))
            .collect()
    }

    fn artifact_address_with(
        &self,
        pattern: &str,
        module: &ModuleRevision,
        artifact: &Artifact,
    ) -> String {
        let organisation = self.organisation_path(&module.organisation);
        self.address(&substitute(
            pattern,
            &[
                ("organisation", organisation.as_str()),
                ("module", module.module.as_str()),
                ("revision", module.revision.as_str()),
                ("artifact", artifact.name.as_str()),
                ("type", artifact.kind.as_str()),
                ("ext", artifact.ext.as_str()),
            ],
        ))
    }

    pub async fn publish(
        &self,
        module: &ModuleRevision,
        artifact: &Artifact,
        source: &Path,
        overwrite: bool,
    ) -> RepoResult<()> {
        let destination = self.artifact_address(module, artifact);
        info!("{}: publishing {} to {}", self.name, source.display(), destination);
        self.repository.store(source, &destination, overwrite).await
    }

    pub async fn publish_descriptor(
        &self,
        module: &ModuleRevision,
        source: &Path,
        overwrite: bool,
    ) -> RepoResult<()> {
        let destination = self.ivy_address(module);
        info!("{}: publishing descriptor to {}", self.name, destination);
        self.repository.store(source, &destination, overwrite).await
    }

    pub async fn download(
        &self,
        module: &ModuleRevision,
        artifact: &Artifact,
        destination: &Path,
    ) -> RepoResult<()> {
        let mut candidates = self.artifact_addresses(module, artifact).into_iter().peekable();
        while let Some(source) = candidates.next() {
            match self.repository.fetch(&source, destination).await {
                Err(RepositoryError::Store(StoreError::NotFound { .. }))
                    if candidates.peek().is_some() =>
                {
                    debug!("{}: {} not found, trying next pattern", self.name, source);
                }
                outcome => return outcome,
            }
        }
        let source = self.artifact_address(module, artifact);
        self.repository.fetch(&source, destination).await
    }

    /// Revisions published for a module, read from the directories at the
    /// `[revision]` position of every artifact pattern. Patterns without a
    /// `[revision]` token contribute nothing.
    pub async fn list_revisions(&self, organisation: &str, module: &str) -> RepoResult<Vec<String>> {
        let organisation = self.organisation_path(organisation);
        let mut revisions: Vec<String> = Vec::new();

        for pattern in &self.artifact_patterns {
            let Some((before, _)) = pattern.split_once(REVISION_TOKEN) else {
                continue;
            };
            let parent = self.address(&substitute(
                before,
                &[("organisation", organisation.as_str()), ("module", module)],
            ));

            let prefix = ObjectAddress::parse(&parent)?.key;
            for entry in self.repository.list(&parent).await? {
                let Some(revision) = entry
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix('/'))
                else {
                    continue;
                };
                if !revision.is_empty() && !revisions.iter().any(|known| known == revision) {
                    revisions.push(revision.to_string());
                }
            }
        }
        Ok(revisions)
    }
}

fn primary<'a>(patterns: &'a [String], default: &'a str) -> &'a str {
    patterns.first().map_or(default, String::as_str)
}

fn substitute(pattern: &str, tokens: &[(&str, &str)]) -> String {
    tokens.iter().fold(pattern.to_string(), |resolved, (token, value)| {
        resolved.replace(&format!("[{token}]"), value)
    })
}
