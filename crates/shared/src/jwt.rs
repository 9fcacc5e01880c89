//! Identity token verification.
//!
//! Tokens are issued by the identity provider in front of this service; we only
//! verify them and read the identity claims (subject, role, tenant, tracked person).
//! RS256 is used in production. HS256 with a shared secret exists for local
//! development and tests. Issuing is available for tooling and tests only when a
//! signing key is configured.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error type for JWT operations.
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    EncodingError(String),

    #[error("Failed to decode token: {0}")]
    DecodingError(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Token signing is not configured")]
    SigningDisabled,
}

/// Identity claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
    /// Role name, e.g. "supervisor"
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Profile id of the tracked person this identity reports for, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked_person_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Claims to place in a newly issued token.
#[derive(Debug, Clone, Default)]
pub struct IdentityClaims {
    pub identity_id: Uuid,
    pub role: String,
    pub tenant_id: Option<Uuid>,
    pub tracked_person_id: Option<Uuid>,
    pub name: Option<String>,
}

/// Verification (and optional signing) keys.
#[derive(Clone)]
pub struct JwtConfig {
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    encoding_key: Option<EncodingKey>,
    /// Expiry for tokens issued through `issue`
    pub access_token_expiry_secs: i64,
    /// Leeway in seconds for clock skew tolerance
    pub leeway_secs: u64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("algorithm", &self.algorithm)
            .field("can_sign", &self.encoding_key.is_some())
            .field("access_token_expiry_secs", &self.access_token_expiry_secs)
            .field("leeway_secs", &self.leeway_secs)
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

/// Default leeway in seconds for clock skew tolerance
pub const DEFAULT_LEEWAY_SECS: u64 = 30;

impl JwtConfig {
    /// RS256 verifier from a PEM public key, optionally able to sign.
    pub fn rs256(
        public_key_pem: &str,
        private_key_pem: Option<&str>,
        access_token_expiry_secs: i64,
        leeway_secs: u64,
    ) -> Result<Self, JwtError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| JwtError::InvalidKey(format!("Invalid public key: {}", e)))?;

        let encoding_key = private_key_pem
            .filter(|pem| !pem.trim().is_empty())
            .map(|pem| {
                EncodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| JwtError::InvalidKey(format!("Invalid private key: {}", e)))
            })
            .transpose()?;

        Ok(Self {
            algorithm: Algorithm::RS256,
            decoding_key,
            encoding_key,
            access_token_expiry_secs,
            leeway_secs,
        })
    }

    /// HS256 verifier/signer from a shared secret. Development and tests only.
    pub fn hs256(secret: &str, access_token_expiry_secs: i64, leeway_secs: u64) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: Some(EncodingKey::from_secret(secret.as_bytes())),
            access_token_expiry_secs,
            leeway_secs,
        }
    }

    /// Issues an access token for the given identity.
    pub fn issue(&self, identity: &IdentityClaims) -> Result<String, JwtError> {
        self.issue_with_expiry(identity, self.access_token_expiry_secs)
    }

    /// Issues a token with an explicit lifetime (negative values yield an expired token).
    pub fn issue_with_expiry(
        &self,
        identity: &IdentityClaims,
        expiry_secs: i64,
    ) -> Result<String, JwtError> {
        let key = self.encoding_key.as_ref().ok_or(JwtError::SigningDisabled)?;
        let now = Utc::now();

        let claims = Claims {
            sub: identity.identity_id.to_string(),
            exp: (now + Duration::seconds(expiry_secs)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            role: identity.role.clone(),
            tenant_id: identity.tenant_id.map(|id| id.to_string()),
            tracked_person_id: identity.tracked_person_id.map(|id| id.to_string()),
            name: identity.name.clone(),
        };

        encode(&Header::new(self.algorithm), &claims, key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))
    }

    /// Validates a token and returns its claims.
    pub fn validate(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = self.leeway_secs;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidToken,
                _ => JwtError::DecodingError(e.to_string()),
            }
        })?;

        Ok(token_data.claims)
    }
}

/// Parses an optional UUID claim; an unparseable value invalidates the token.
pub fn parse_uuid_claim(value: Option<&str>) -> Result<Option<Uuid>, JwtError> {
    value
        .map(|v| Uuid::parse_str(v).map_err(|_| JwtError::InvalidToken))
        .transpose()
}
