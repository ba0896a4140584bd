//! Registry authentication
//!
//! Implements the token flow of the distribution API: a 401 carries a
//! `WWW-Authenticate` challenge, the challenge names a token realm, and the
//! token obtained there is replayed as a bearer header.

use drydock_core::domain::image::RegistryCredentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::RegistryClient;
use crate::error::{RegistryError, Result};

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

/// Parses a `WWW-Authenticate` header value
///
/// Parameter values may be quoted and quoted values may contain commas
/// (`scope="repository:a:pull,push"`).
pub(crate) fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let params = parse_params(rest);
    let realm = params.get("realm")?.clone();

    Some(Challenge::Bearer {
        realm,
        service: params.get("service").cloned(),
        scope: params.get("scope").cloned(),
    })
}

fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    params
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Bearer tokens keyed by realm, service, scope and user
#[derive(Default)]
pub(crate) struct TokenCache {
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    fn get(&self, key: &str) -> Option<String> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(key)
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.token.clone())
    }

    fn insert(&self, key: String, token: String, ttl: Duration) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|_, cached| cached.expires_at > Instant::now());
        tokens.insert(
            key,
            CachedToken {
                token,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

impl RegistryClient {
    /// Obtain a bearer token for a challenge, reusing a cached one if still valid
    pub(crate) async fn bearer_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let cache_key = format!(
            "{}|{}|{}|{}",
            realm,
            service.unwrap_or_default(),
            scope,
            credentials.map(|c| c.username.as_str()).unwrap_or_default()
        );

        if let Some(token) = self.tokens.get(&cache_key) {
            debug!(realm, scope, "Using cached registry token");
            return Ok(token);
        }

        let mut query = vec![("scope", scope)];
        if let Some(service) = service {
            query.push(("service", service));
        }

        let mut request = self.client.get(realm).query(&query);
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(RegistryError::Unauthorized(format!(
                "token endpoint {} rejected credentials",
                realm
            )));
        }
        if !status.is_success() {
            return Err(RegistryError::TokenExchange(format!(
                "token endpoint {} returned {}",
                realm, status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::TokenExchange(format!("invalid token response: {}", e)))?;

        // Docker Hub answers with "token", some registries with "access_token"
        let token = body
            .token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::TokenExchange("response carried no token".into()))?;

        let ttl = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        self.tokens.insert(cache_key, token.clone(), ttl);

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docker_hub_challenge() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#;
        assert_eq!(
            parse_challenge(header),
            Some(Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
                scope: Some("repository:library/nginx:pull".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_scope_with_comma() {
        let header = r#"Bearer realm="https://ghcr.io/token",scope="repository:org/app:pull,push""#;
        match parse_challenge(header) {
            Some(Challenge::Bearer { scope, service, .. }) => {
                assert_eq!(scope.as_deref(), Some("repository:org/app:pull,push"));
                assert!(service.is_none());
            }
            other => panic!("unexpected challenge: {:?}", other),
        }
    }

    #[test]
    fn test_parse_basic_and_unknown() {
        assert_eq!(parse_challenge(r#"Basic realm="x""#), Some(Challenge::Basic));
        assert_eq!(parse_challenge("Negotiate"), None);
        assert_eq!(parse_challenge(r#"Bearer service="x""#), None);
    }

    #[test]
    fn test_token_cache_expiry() {
        let cache = TokenCache::default();
        cache.insert("k".into(), "t".into(), Duration::from_secs(60));
        assert_eq!(cache.get("k").as_deref(), Some("t"));

        cache.insert("gone".into(), "t".into(), Duration::ZERO);
        assert!(cache.get("gone").is_none());
    }
}
