//! Image reference parsing
//!
//! Resolves user-supplied image names like `myapp`, `ghcr.io/org/app:v1` or
//! `localhost:5000/app@sha256:...` into canonical, fully qualified names.

use crate::error::{PackError, PackResult};
use std::fmt;
use std::str::FromStr;

/// Registry assumed for references without an explicit registry host
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag assumed for references without a tag or digest
pub const DEFAULT_TAG: &str = "latest";

/// Tag or digest part of a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Tag(String),
    Digest(String),
}

/// A parsed, canonical image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    registry: String,
    repository: String,
    identifier: Identifier,
}

impl ImageRef {
    /// Parse and validate an image reference
    pub fn parse(reference: &str) -> PackResult<Self> {
        let invalid = |reason: &str| PackError::InvalidImageReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(invalid("reference contains whitespace"));
        }

        let (remainder, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (trimmed, None),
        };

        let (registry, path) = match remainder.split_once('/') {
            Some(("docker.io", rest)) => (DEFAULT_REGISTRY.to_string(), rest.to_string()),
            Some((host, rest)) if is_registry_host(host) => (host.to_string(), rest.to_string()),
            _ => (DEFAULT_REGISTRY.to_string(), remainder.to_string()),
        };

        // A tag separator only counts after the last path component
        let last_slash = path.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match path[last_slash..].rfind(':') {
            Some(i) => {
                let at = last_slash + i;
                (path[..at].to_string(), Some(path[at + 1..].to_string()))
            }
            None => (path, None),
        };

        if repository.is_empty() {
            return Err(invalid("repository name is empty"));
        }
        if !repository
            .split('/')
            .all(|c| !c.is_empty() && c.chars().all(is_repository_char))
        {
            return Err(invalid(
                "repository must be lowercase letters, digits, '.', '_', '-' separated by '/'",
            ));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        let identifier = match (tag, digest) {
            (_, Some(digest)) => {
                let valid = digest
                    .split_once(':')
                    .is_some_and(|(algo, hex)| {
                        !algo.is_empty()
                            && hex.len() >= 32
                            && hex.chars().all(|c| c.is_ascii_hexdigit())
                    });
                if !valid {
                    return Err(invalid("digest must look like <algorithm>:<hex>"));
                }
                Identifier::Digest(digest.to_string())
            }
            (Some(tag), None) => {
                if tag.is_empty()
                    || tag.len() > 128
                    || !tag
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
                {
                    return Err(invalid("tag must be 1-128 characters of [A-Za-z0-9_.-]"));
                }
                Identifier::Tag(tag)
            }
            (None, None) => Identifier::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            identifier,
        })
    }

    /// Registry host, e.g. `index.docker.io`
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry, e.g. `library/ubuntu`
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Fully qualified name, e.g. `index.docker.io/library/ubuntu:latest`
    pub fn name(&self) -> String {
        match &self.identifier {
            Identifier::Tag(tag) => format!("{}/{}:{}", self.registry, self.repository, tag),
            Identifier::Digest(digest) => {
                format!("{}/{}@{}", self.registry, self.repository, digest)
            }
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ImageRef {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn is_repository_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
}
