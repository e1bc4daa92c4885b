//! Session decoding port and JWT implementation
//!
//! The core only needs one thing from the surrounding auth system: turn a
//! bearer token into a [`Session`] or a precise failure. [`JwtSessionDecoder`]
//! is the stock HS256 implementation; services with another token scheme
//! implement [`SessionDecoder`] themselves.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::{Permission, Session};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session expired")]
    Expired,
    #[error("invalid session token")]
    Invalid,
}

/// Turns a raw bearer token into a session.
pub trait SessionDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<Session, SessionError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    exp: i64,
    iat: i64,
    #[serde(default)]
    permissions: Vec<Permission>,
}

/// HS256 JWT session decoder.
pub struct JwtSessionDecoder {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSessionDecoder {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::default(),
        }
    }

    /// Mint a token for `session`, valid for `ttl_hours`. Used by services
    /// that issue sessions and by tests.
    pub fn issue(&self, session: &Session, ttl_hours: i64) -> Result<String, SessionError> {
        let now = Utc::now();
        let claims = Claims {
            sub: session.user_id,
            exp: (now + Duration::hours(ttl_hours)).timestamp(),
            iat: now.timestamp(),
            permissions: session.permissions.iter().copied().collect(),
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| SessionError::Invalid)
    }
}

impl SessionDecoder for JwtSessionDecoder {
    fn decode(&self, token: &str) -> Result<Session, SessionError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |error| match error.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid,
            },
        )?;
        Ok(Session {
            user_id: data.claims.sub,
            permissions: data.claims.permissions.into_iter().collect(),
        })
    }
}
