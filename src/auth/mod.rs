pub mod discovery;

use axum::http::{header, HeaderMap};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::config::OpenIdConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credential: {0}")]
    InvalidToken(String),

    #[error("credential signed with unknown key")]
    UnknownKey,

    #[error("unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    #[error("credential carries no email claim")]
    MissingEmail,

    #[error("email not verified")]
    EmailNotVerified,

    #[error("identity provider discovery failed: {0}")]
    Discovery(String),
}

/// Verified email of the requester. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Some providers send `email_verified` as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmailVerified {
    Flag(bool),
    Text(String),
}

impl EmailVerified {
    fn is_true(&self) -> bool {
        match self {
            EmailVerified::Flag(v) => *v,
            EmailVerified::Text(v) => v.eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    email: Option<String>,
    email_verified: Option<EmailVerified>,
}

/// Verifies ID tokens against an issuer's published keys.
///
/// Key material is fetched once when the gate is built and never refreshed.
pub struct IdentityGate {
    issuer: String,
    audience: String,
    keys: JwkSet,
}

impl IdentityGate {
    pub fn from_jwks(issuer: impl Into<String>, audience: impl Into<String>, keys: JwkSet) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            keys,
        }
    }

    /// Fetch the provider's discovery document and signing keys.
    pub async fn discover(config: &OpenIdConfig) -> Result<Self, AuthError> {
        let provider = discovery::discover(config).await?;
        tracing::info!(
            "Loaded {} signing keys from issuer {}",
            provider.keys.keys.len(),
            provider.issuer
        );
        Ok(Self::from_jwks(provider.issuer, config.client_id.clone(), provider.keys))
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// A missing header is verified as an empty credential and fails there.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<CallerIdentity, AuthError> {
        self.verify(bearer_token(headers))
    }

    pub fn verify(&self, token: &str) -> Result<CallerIdentity, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if !is_asymmetric(header.alg) {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }

        let jwk = self.key_for(header.kid.as_deref())?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_audience(std::slice::from_ref(&self.audience));

        let claims = decode::<IdTokenClaims>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?
            .claims;

        if !claims.email_verified.map(|v| v.is_true()).unwrap_or(false) {
            return Err(AuthError::EmailNotVerified);
        }

        claims
            .email
            .filter(|email| !email.trim().is_empty())
            .map(CallerIdentity)
            .ok_or(AuthError::MissingEmail)
    }

    fn key_for(&self, kid: Option<&str>) -> Result<&Jwk, AuthError> {
        match kid {
            Some(kid) => self.keys.find(kid).ok_or(AuthError::UnknownKey),
            None => match self.keys.keys.as_slice() {
                [only] => Ok(only),
                _ => Err(AuthError::UnknownKey),
            },
        }
    }
}

fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Credential from `Authorization: Bearer <token>`, or empty.
fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
        .unwrap_or("")
}
