//! Drydock Registry Client
//!
//! A small client for the container registry distribution API. It answers a
//! single question: "what digest does this tag point at right now?"
//!
//! # Example
//!
//! ```no_run
//! use drydock_core::domain::image::ImageReference;
//! use drydock_registry::{DigestLookup, RegistryClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = RegistryClient::new();
//!     let image = ImageReference::parse("nginx:1.25")?;
//!
//!     let digest = client.lookup_digest(&image, None).await?;
//!     println!("nginx:1.25 -> {}", digest);
//!     Ok(())
//! }
//! ```

mod auth;
pub mod error;
mod manifests;

// Re-export commonly used types
pub use error::{RegistryError, Result};

use async_trait::async_trait;
use drydock_core::domain::image::{ImageReference, RegistryCredentials};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenCache;

/// Resolves the digest an image reference currently points at
///
/// This is the seam between the polling engine and the network. The engine
/// only ever sees this trait, so tests substitute an in-memory fake.
#[async_trait]
pub trait DigestLookup: Send + Sync {
    /// Returns the remote manifest digest for `image`
    ///
    /// # Arguments
    /// * `image` - The normalised image reference
    /// * `credentials` - Credentials for private registries, if any
    async fn lookup_digest(
        &self,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String>;
}

/// HTTP client for registry manifest lookups
///
/// Cloning is cheap; clones share the connection pool and the token cache.
#[derive(Clone)]
pub struct RegistryClient {
    /// HTTP client instance
    client: Client,
    /// Registries reached over plain HTTP
    insecure_registries: Arc<HashSet<String>>,
    /// Bearer tokens obtained from registry auth realms
    tokens: Arc<TokenCache>,
}

impl RegistryClient {
    /// Create a registry client with default settings
    ///
    /// Requests time out after 30 seconds.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a registry client whose requests time out after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("drydock/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(client)
    }

    /// Create a registry client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Example
    /// ```
    /// use drydock_registry::RegistryClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(10))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = RegistryClient::with_client(http_client);
    /// ```
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            insecure_registries: Arc::new(HashSet::new()),
            tokens: Arc::new(TokenCache::default()),
        }
    }

    /// Reach the given registries over plain HTTP
    ///
    /// Loopback registries (`localhost`, `127.0.0.1`) are always plain HTTP.
    pub fn with_insecure_registries<I, S>(mut self, registries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insecure_registries = Arc::new(registries.into_iter().map(Into::into).collect());
        self
    }

    /// Base URL of the registry API serving `image`
    pub fn base_url(&self, image: &ImageReference) -> String {
        let host = image.api_host();
        let hostname = host.split(':').next().unwrap_or(host);
        let plain = self.insecure_registries.contains(&image.registry)
            || hostname == "localhost"
            || hostname == "127.0.0.1";

        if plain {
            format!("http://{}", host)
        } else {
            format!("https://{}", host)
        }
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DigestLookup for RegistryClient {
    async fn lookup_digest(
        &self,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        self.fetch_manifest_digest(image, credentials).await
    }
}
