use crate::error::{Error, Result};
use crate::gateway::route::AuthLevel;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 8;

/// The authenticated caller attached to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub customer_id: Option<u64>,
    pub admin: bool,
}

impl Principal {
    /// Whether this principal satisfies a route's required level.
    pub fn satisfies(&self, level: AuthLevel) -> bool {
        match level {
            AuthLevel::Public | AuthLevel::Customer => true,
            AuthLevel::Admin => self.admin,
        }
    }

    /// Whether this principal may act on `customer_id`'s records.
    pub fn owns_customer(&self, customer_id: u64) -> bool {
        self.admin || self.customer_id == Some(customer_id)
    }

    /// Bucket key used by the rate limiter.
    pub fn rate_key(&self) -> String {
        if self.admin {
            "admin".to_string()
        } else {
            match self.customer_id {
                Some(id) => format!("customer-{id}"),
                None => "service".to_string(),
            }
        }
    }
}

/// A successful login.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub customer_id: u64,
    pub expires_at: DateTime<Utc>,
}

struct Credential {
    customer_id: u64,
    salt: String,
    digest: String,
}

struct IssuedToken {
    principal: Principal,
    expires_at: DateTime<Utc>,
}

/// Issues and verifies bearer tokens for the gateway.
///
/// Credentials are held in-process with salted, peppered SHA-256 digests;
/// issued tokens are opaque UUIDs with a TTL. An optional bootstrap admin
/// token from configuration grants admin access without a credential record.
pub struct AuthService {
    pepper: String,
    ttl: Duration,
    admin_token: Option<String>,
    credentials: RwLock<HashMap<String, Credential>>,
    tokens: RwLock<HashMap<String, IssuedToken>>,
    next_customer_id: AtomicU64,
}

impl AuthService {
    pub fn new(pepper: String, admin_token: Option<String>, token_ttl_secs: u64) -> Self {
        Self {
            pepper,
            ttl: Duration::seconds(token_ttl_secs as i64),
            admin_token,
            credentials: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            next_customer_id: AtomicU64::new(1),
        }
    }

    fn digest(&self, salt: &str, password: &str) -> String {
        let input = format!("{}:{}:{}", self.pepper, salt, password);
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    /// Creates a customer credential, returning the new customer id.
    pub async fn register(&self, email: &str, password: &str) -> Result<u64> {
        if email.trim().is_empty() || !email.contains('@') {
            return Err(Error::InvalidInput(
                "a valid email address is required".to_string(),
            ));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let mut credentials = self.credentials.write().await;
        if credentials.contains_key(email) {
            return Err(Error::Conflict(format!(
                "an account already exists for {email}"
            )));
        }

        let customer_id = self.next_customer_id.fetch_add(1, Ordering::SeqCst);
        let salt = Uuid::new_v4().to_string();
        let digest = self.digest(&salt, password);
        credentials.insert(
            email.to_string(),
            Credential {
                customer_id,
                salt,
                digest,
            },
        );
        Ok(customer_id)
    }

    /// Verifies a credential and issues a fresh bearer token.
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedSession> {
        let credentials = self.credentials.read().await;
        let credential = credentials.get(email).ok_or(Error::Unauthorized)?;
        if self.digest(&credential.salt, password) != credential.digest {
            return Err(Error::Unauthorized);
        }
        let customer_id = credential.customer_id;
        drop(credentials);

        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.ttl;
        self.tokens.write().await.insert(
            token.clone(),
            IssuedToken {
                principal: Principal {
                    customer_id: Some(customer_id),
                    admin: false,
                },
                expires_at,
            },
        );
        Ok(IssuedSession {
            token,
            customer_id,
            expires_at,
        })
    }

    /// Resolves the bearer token on a request, if any.
    ///
    /// `Ok(None)` means no credential was presented; a presented but invalid
    /// or expired token is an error so it can never be mistaken for an
    /// anonymous caller.
    pub async fn verify(&self, headers: &HeaderMap) -> Result<Option<Principal>> {
        let Some(raw) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let token = raw
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(Error::Unauthorized)?;

        if self
            .admin_token
            .as_deref()
            .is_some_and(|admin| admin == token)
        {
            return Ok(Some(Principal {
                customer_id: None,
                admin: true,
            }));
        }

        let mut tokens = self.tokens.write().await;
        match tokens.get(token) {
            Some(issued) if issued.expires_at > Utc::now() => Ok(Some(issued.principal.clone())),
            Some(_) => {
                tokens.remove(token);
                Err(Error::Unauthorized)
            }
            None => Err(Error::Unauthorized),
        }
    }
}
