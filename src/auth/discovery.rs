use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;
use url::Url;

use super::AuthError;
use crate::config::OpenIdConfig;

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
}

pub struct DiscoveredProvider {
    pub issuer: String,
    pub keys: JwkSet,
}

/// `{provider}/.well-known/openid-configuration`, keeping any path on the issuer.
pub fn discovery_url(provider: &str) -> Result<Url, AuthError> {
    let base = format!("{}/", provider.trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|url| url.join(".well-known/openid-configuration"))
        .map_err(|e| AuthError::Discovery(format!("invalid provider URL {}: {}", provider, e)))
}

pub async fn discover(config: &OpenIdConfig) -> Result<DiscoveredProvider, AuthError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.discovery_timeout_secs))
        .build()
        .map_err(|e| AuthError::Discovery(format!("failed to build http client: {}", e)))?;

    let url = discovery_url(&config.provider)?;
    let metadata: ProviderMetadata = fetch_json(&http, url.as_str()).await?;

    // The document must describe the issuer we were configured to trust.
    if metadata.issuer.trim_end_matches('/') != config.provider.trim_end_matches('/') {
        return Err(AuthError::Discovery(format!(
            "issuer mismatch: expected {}, provider reports {}",
            config.provider, metadata.issuer
        )));
    }

    let keys: JwkSet = fetch_json(&http, &metadata.jwks_uri).await?;
    if keys.keys.is_empty() {
        return Err(AuthError::Discovery(format!("no signing keys at {}", metadata.jwks_uri)));
    }

    Ok(DiscoveredProvider {
        issuer: metadata.issuer,
        keys,
    })
}

async fn fetch_json<T: serde::de::DeserializeOwned>(http: &reqwest::Client, url: &str) -> Result<T, AuthError> {
    http.get(url)
        .send()
        .await
        .map_err(|e| AuthError::Discovery(format!("GET {}: {}", url, e)))?
        .error_for_status()
        .map_err(|e| AuthError::Discovery(format!("GET {}: {}", url, e)))?
        .json::<T>()
        .await
        .map_err(|e| AuthError::Discovery(format!("GET {}: invalid JSON: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_keeps_issuer_path() {
        assert_eq!(
            discovery_url("https://accounts.example.com").unwrap().as_str(),
            "https://accounts.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://login.example.com/tenant/v2.0/").unwrap().as_str(),
            "https://login.example.com/tenant/v2.0/.well-known/openid-configuration"
        );
    }

    #[test]
    fn discovery_url_rejects_garbage() {
        assert!(matches!(discovery_url("::"), Err(AuthError::Discovery(_))));
    }
}
