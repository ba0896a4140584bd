//! Manifest digest resolution

use drydock_core::domain::image::{ImageReference, RegistryCredentials};
use reqwest::header::{ACCEPT, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::RegistryClient;
use crate::auth::{Challenge, parse_challenge};
use crate::error::{RegistryError, Result};

/// Manifest media types we accept, multi-arch indexes first so the digest
/// matches what `docker pull` records for the tag
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.oci.image.manifest.v1+json";

const DIGEST_HEADER: &str = "docker-content-digest";

enum Authorization {
    Anonymous,
    Bearer(String),
    Basic,
}

impl RegistryClient {
    // =============================================================================
    // Digest Lookup
    // =============================================================================

    /// Resolve the manifest digest of `image`
    ///
    /// Issues a HEAD request first; registries that omit the digest header
    /// on HEAD get a GET and the body is hashed instead.
    pub(crate) async fn fetch_manifest_digest(
        &self,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url(image),
            image.repository,
            image.reference
        );

        let mut auth = Authorization::Anonymous;
        let mut response = self
            .manifest_request(Method::HEAD, &url, &auth, credentials)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            auth = self.authorize(response.headers(), image, credentials).await?;
            response = self
                .manifest_request(Method::HEAD, &url, &auth, credentials)
                .await?;
        }

        let response = check_status(response, image).await?;
        if let Some(digest) = digest_header(response.headers()) {
            debug!(image = %image, digest = %digest, "Resolved digest from HEAD");
            return Ok(digest);
        }

        debug!(image = %image, "HEAD carried no digest, falling back to GET");
        let response = self
            .manifest_request(Method::GET, &url, &auth, credentials)
            .await?;
        let response = check_status(response, image).await?;
        if let Some(digest) = digest_header(response.headers()) {
            return Ok(digest);
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(RegistryError::MissingDigest(image.to_string()));
        }
        Ok(format!("sha256:{:x}", Sha256::digest(&body)))
    }

    async fn manifest_request(
        &self,
        method: Method,
        url: &str,
        auth: &Authorization,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Response> {
        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, MANIFEST_ACCEPT);

        request = match (auth, credentials) {
            (Authorization::Bearer(token), _) => request.bearer_auth(token),
            (Authorization::Basic, Some(creds)) => {
                request.basic_auth(&creds.username, Some(&creds.password))
            }
            _ => request,
        };

        Ok(request.send().await?)
    }

    /// Answer a 401 challenge
    async fn authorize(
        &self,
        headers: &HeaderMap,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Authorization> {
        let challenge = headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge);

        match challenge {
            Some(Challenge::Bearer {
                realm,
                service,
                scope,
            }) => {
                let scope =
                    scope.unwrap_or_else(|| format!("repository:{}:pull", image.repository));
                let token = self
                    .bearer_token(&realm, service.as_deref(), &scope, credentials)
                    .await?;
                Ok(Authorization::Bearer(token))
            }
            Some(Challenge::Basic) if credentials.is_some() => Ok(Authorization::Basic),
            Some(Challenge::Basic) => Err(RegistryError::Unauthorized(format!(
                "{} requires credentials",
                image.registry
            ))),
            None => Err(RegistryError::Unauthorized(format!(
                "{} sent no usable authentication challenge",
                image.registry
            ))),
        }
    }
}

fn digest_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn check_status(response: Response, image: &ImageReference) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(image.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::Unauthorized(
            format!("{} denied access to {}", image.registry, image),
        )),
        _ => {
            let message = response
                .text()
                .await
                .ok()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
            Err(RegistryError::status(status.as_u16(), message))
        }
    }
}
