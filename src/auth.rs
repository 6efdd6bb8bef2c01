//! Caller identity resolution.
//!
//! The bearer token comes from `Authorization: Bearer <token>` or
//! `X-API-Key`. Resolution never rejects the request by itself; endpoints
//! decide with [`Caller::require`].

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

use crate::error::NoteError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
}

/// Resolves a bearer token to a caller.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identify(&self, token: &str) -> Option<CallerIdentity>;
}

/// Verifies HS256 JWTs issued by Supabase Auth; the `sub` claim is the user.
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["authenticated"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn identify(&self, token: &str) -> Option<CallerIdentity> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) if !data.claims.sub.is_empty() => Some(CallerIdentity {
                user_id: data.claims.sub,
            }),
            Ok(_) => None,
            Err(e) => {
                debug!("Rejected bearer token: {}", e);
                None
            }
        }
    }
}

/// Fixed token table for local development.
pub struct StaticTokenIdentity {
    tokens: HashMap<String, String>,
}

impl StaticTokenIdentity {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn identify(&self, token: &str) -> Option<CallerIdentity> {
        self.tokens.get(token).map(|user_id| CallerIdentity {
            user_id: user_id.clone(),
        })
    }
}

/// Tries each provider in order.
pub struct ChainedIdentity {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ChainedIdentity {
    pub fn new(providers: Vec<Arc<dyn IdentityProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl IdentityProvider for ChainedIdentity {
    async fn identify(&self, token: &str) -> Option<CallerIdentity> {
        for provider in &self.providers {
            if let Some(identity) = provider.identify(token).await {
                return Some(identity);
            }
        }
        None
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        .or_else(|| headers.get("X-API-Key").and_then(|v| v.to_str().ok()))
        .filter(|token| !token.is_empty())
}

/// Extractor holding the resolved caller, if any.
#[derive(Debug, Clone)]
pub struct Caller(pub Option<CallerIdentity>);

impl Caller {
    pub fn require(self) -> Result<CallerIdentity, NoteError> {
        self.0.ok_or(NoteError::AuthFailed)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    Arc<dyn IdentityProvider>: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let provider = Arc::<dyn IdentityProvider>::from_ref(state);
        let identity = match bearer_token(&parts.headers) {
            Some(token) => provider.identify(token).await,
            None => None,
        };
        Ok(Caller(identity))
    }
}
