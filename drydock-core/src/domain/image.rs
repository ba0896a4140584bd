//! Image reference domain model
//!
//! Parses the `[registry/]repository[:tag][@digest]` form used in compose
//! files and container specs, normalised the way the Docker CLI does it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Registry assumed when a reference names none
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Host actually serving the Docker Hub registry API
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

/// Tag assumed when a reference names none
pub const DEFAULT_TAG: &str = "latest";

/// Errors produced while parsing an image reference
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageReferenceError {
    #[error("image reference is empty")]
    Empty,

    #[error("image reference '{0}' contains whitespace")]
    Whitespace(String),

    #[error("image reference '{0}' has an empty repository")]
    EmptyRepository(String),

    #[error("image reference '{0}' has an empty tag")]
    EmptyTag(String),

    #[error("image reference '{0}' has a malformed digest")]
    InvalidDigest(String),
}

/// Tag or digest part of a reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManifestReference {
    Tag(String),
    Digest(String),
}

impl fmt::Display for ManifestReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestReference::Tag(tag) => write!(f, "{}", tag),
            ManifestReference::Digest(digest) => write!(f, "{}", digest),
        }
    }
}

/// A fully normalised image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry name as written by users (e.g. "docker.io", "ghcr.io")
    pub registry: String,

    /// Repository path (e.g. "library/nginx")
    pub repository: String,

    /// Tag or digest the reference points at
    pub reference: ManifestReference,
}

impl ImageReference {
    /// Parses and normalises an image reference
    ///
    /// # Example
    /// ```
    /// use drydock_core::domain::image::ImageReference;
    ///
    /// let image = ImageReference::parse("nginx").unwrap();
    /// assert_eq!(image.to_string(), "docker.io/library/nginx:latest");
    /// ```
    pub fn parse(input: &str) -> Result<Self, ImageReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ImageReferenceError::Empty);
        }
        if input.chars().any(char::is_whitespace) {
            return Err(ImageReferenceError::Whitespace(input.to_string()));
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                let valid = digest
                    .split_once(':')
                    .is_some_and(|(algo, hex)| !algo.is_empty() && !hex.is_empty());
                if !valid {
                    return Err(ImageReferenceError::InvalidDigest(input.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones are ports
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(offset) => {
                let split = last_slash + offset;
                let tag = &name[split + 1..];
                if tag.is_empty() {
                    return Err(ImageReferenceError::EmptyTag(input.to_string()));
                }
                (&name[..split], Some(tag.to_string()))
            }
            None => (name, None),
        };

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), path.to_string()),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(ImageReferenceError::EmptyRepository(input.to_string()));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        let reference = match (digest, tag) {
            (Some(digest), _) => ManifestReference::Digest(digest),
            (None, Some(tag)) => ManifestReference::Tag(tag),
            (None, None) => ManifestReference::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }

    /// Host that serves the registry HTTP API for this reference
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            &self.registry
        }
    }

    /// Whether the reference is pinned to an immutable digest
    pub fn is_digest_pinned(&self) -> bool {
        matches!(self.reference, ManifestReference::Digest(_))
    }
}

impl FromStr for ImageReference {
    type Err = ImageReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            ManifestReference::Tag(tag) => {
                write!(f, "{}/{}:{}", self.registry, self.repository, tag)
            }
            ManifestReference::Digest(digest) => {
                write!(f, "{}/{}@{}", self.registry, self.repository, digest)
            }
        }
    }
}

/// Credentials used to talk to a private registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl RegistryCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_official_image() {
        let image = ImageReference::parse("nginx").unwrap();
        assert_eq!(image.registry, "docker.io");
        assert_eq!(image.repository, "library/nginx");
        assert_eq!(image.reference, ManifestReference::Tag("latest".to_string()));
        assert_eq!(image.api_host(), DOCKER_HUB_API_HOST);
    }

    #[test]
    fn test_parse_user_image_with_tag() {
        let image = ImageReference::parse("grafana/grafana:10.2.0").unwrap();
        assert_eq!(image.repository, "grafana/grafana");
        assert_eq!(image.reference, ManifestReference::Tag("10.2.0".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = ImageReference::parse("localhost:5000/team/app").unwrap();
        assert_eq!(image.registry, "localhost:5000");
        assert_eq!(image.repository, "team/app");
        assert_eq!(image.reference, ManifestReference::Tag("latest".to_string()));
        assert_eq!(image.api_host(), "localhost:5000");
    }

    #[test]
    fn test_parse_digest_pinned() {
        let image = ImageReference::parse("ghcr.io/org/tool:v1@sha256:abc123").unwrap();
        assert_eq!(image.registry, "ghcr.io");
        assert!(image.is_digest_pinned());
        assert_eq!(image.to_string(), "ghcr.io/org/tool@sha256:abc123");
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert_eq!(ImageReference::parse("  "), Err(ImageReferenceError::Empty));
        assert!(matches!(
            ImageReference::parse("nginx:"),
            Err(ImageReferenceError::EmptyTag(_))
        ));
        assert!(matches!(
            ImageReference::parse("nginx@sha256"),
            Err(ImageReferenceError::InvalidDigest(_))
        ));
        assert!(matches!(
            ImageReference::parse("ghcr.io//app"),
            Err(ImageReferenceError::EmptyRepository(_))
        ));
        assert!(matches!(
            ImageReference::parse("my image"),
            Err(ImageReferenceError::Whitespace(_))
        ));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = RegistryCredentials::new("bot", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("bot"));
        assert!(!rendered.contains("hunter2"));
    }
}
