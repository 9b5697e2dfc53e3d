//! Signed session tokens.
//!
//! Tokens are HS256 JWTs carrying `{sub, email, role}` plus `typ` to separate
//! short-lived access tokens from long-lived refresh tokens. Nothing is stored
//! server-side; verification is signature + issuer + expiry + kind.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::principal::Principal;
use super::user::{Role, UserRecord};
use crate::config::MIN_SECRET_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub typ: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token signature invalid")]
    BadSignature,
    #[error("token is not a {0:?} token")]
    WrongKind(TokenKind),
    #[error("malformed token: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
}

impl TokenIssuer {
    /// A short or empty secret is a configuration error and fails construction.
    pub fn new(secret: &[u8], issuer: &str, access_ttl: Duration, refresh_ttl: Duration) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!("token secret must be at least {} bytes", MIN_SECRET_LEN));
        }
        let access_ttl = chrono::Duration::from_std(access_ttl).context("access token lifetime")?;
        let refresh_ttl = chrono::Duration::from_std(refresh_ttl).context("refresh token lifetime")?;
        Ok(Self::with_lifetimes(secret, issuer, access_ttl, refresh_ttl))
    }

    /// Signed lifetimes, so tests can mint tokens that are already expired.
    pub fn with_lifetimes(secret: &[u8], issuer: &str, access_ttl: chrono::Duration, refresh_ttl: chrono::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn issue(&self, subject: &str, email: &str, role: Role) -> Result<String> {
        self.sign(subject, email, role, TokenKind::Access, self.access_ttl)
    }

    pub fn issue_refresh(&self, subject: &str, email: &str, role: Role) -> Result<String> {
        self.sign(subject, email, role, TokenKind::Refresh, self.refresh_ttl)
    }

    pub fn issue_pair(&self, user: &UserRecord) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue(&user.id, &user.email, user.role)?,
            refresh_token: self.issue_refresh(&user.id, &user.email, user.role)?,
        })
    }

    fn sign(&self, subject: &str, email: &str, role: Role, typ: TokenKind, ttl: chrono::Duration) -> Result<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            email: email.to_string(),
            role,
            typ,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).context("token signing failed")
    }

    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Principal, TokenError> {
        let claims = self.decode_claims(token)?;
        if claims.typ != expected {
            return Err(TokenError::WrongKind(expected));
        }
        if claims.sub.is_empty() {
            return Err(TokenError::Malformed("missing subject".into()));
        }
        Ok(Principal { subject: claims.sub, email: claims.email, role: claims.role })
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed(e.to_string()),
            })
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let token = header_value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}
