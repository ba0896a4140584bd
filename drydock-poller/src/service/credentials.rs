//! Registry credential lookup

use drydock_core::domain::image::RegistryCredentials;
use std::collections::HashMap;

/// Source of credentials for private registries
pub trait CredentialStore: Send + Sync {
    /// Credentials for `registry` (as written in image references), if any
    fn credentials_for(&self, registry: &str) -> Option<RegistryCredentials>;
}

/// Fixed set of credentials keyed by registry host
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    entries: HashMap<String, RegistryCredentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registry: impl Into<String>, credentials: RegistryCredentials) {
        self.entries.insert(registry.into(), credentials);
    }

    pub fn with(mut self, registry: impl Into<String>, credentials: RegistryCredentials) -> Self {
        self.insert(registry, credentials);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for StaticCredentials {
    fn credentials_for(&self, registry: &str) -> Option<RegistryCredentials> {
        self.entries.get(registry).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_registry() {
        let store =
            StaticCredentials::new().with("ghcr.io", RegistryCredentials::new("bot", "token"));

        assert_eq!(store.credentials_for("ghcr.io").unwrap().username, "bot");
        assert!(store.credentials_for("docker.io").is_none());
        assert_eq!(store.len(), 1);
    }
}
