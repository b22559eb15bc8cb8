use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Service,
    Provider,
    Client,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "service" => Ok(Role::Service),
            "provider" => Ok(Role::Provider),
            "client" => Ok(Role::Client),
            other => Err(format!(
                "unknown role: {other}, expected admin/service/provider/client"
            )),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Admin => "admin",
            Role::Service => "service",
            Role::Provider => "provider",
            Role::Client => "client",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

/// Resolves a bearer credential to the caller it belongs to.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<Principal>;
}

#[derive(Default)]
pub struct TokenAuthenticator {
    tokens: DashMap<String, Principal>,
}

impl TokenAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = (String, Principal)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<Principal> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }
}

/// Token of a `Bearer` credential. The scheme name is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolves an `Authorization` header value and checks the caller holds one of `allowed`.
pub fn authorize(
    authenticator: &dyn Authenticator,
    header: Option<&str>,
    allowed: &[Role],
) -> Result<Principal, AppError> {
    let token = header
        .and_then(bearer_token)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

    let principal = authenticator
        .authenticate(token)
        .ok_or_else(|| AppError::Unauthorized("invalid credentials".to_string()))?;

    if !allowed.contains(&principal.role) {
        return Err(AppError::Forbidden(format!(
            "role {} is not allowed to perform this operation",
            principal.role
        )));
    }

    Ok(principal)
}
