//! Authentication utilities
//!
//! Provides:
//! - JWT access token verification (and issuing, for the in-memory provider)
//! - `AuthContext` extraction from the `Authorization` header
//! - The `AuthProvider` seam to the external identity service

use crate::config::AuthConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Authenticated caller, available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Owner id used to scope every read and write
    pub user_id: Uuid,

    pub email: Option<String>,

    /// Raw bearer token (needed to sign out)
    pub token: String,

    /// Request ID for tracing
    pub request_id: String,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
    audience: Option<String>,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64, audience: Option<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
            audience,
        }
    }

    /// Build from the `auth` config section; the shared secret is mandatory
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let secret = config
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "auth.jwt_secret is required".to_string(),
            })?;

        Ok(Self::new(secret, config.jwt_expiration_secs, config.jwt_audience.clone()))
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, user_id: Uuid, email: Option<&str>) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            email: email.map(String::from),
            aud: self.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to generate token: {}", e),
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        match self.audience {
            Some(ref aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }
}

/// Hash a secret with SHA-256 (hex)
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the token from a `Bearer` Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must use the Bearer scheme".to_string(),
        })?;

        let jwt = Arc::<JwtManager>::from_ref(state);
        let claims = jwt.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)?;

        Ok(AuthContext {
            user_id,
            email: claims.email,
            token: token.to_string(),
            request_id,
        })
    }
}

// ============================================================================
// Identity provider
// ============================================================================

/// Signed-in session
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub access_token: String,
}

/// Registration result; `session` is absent while the email is unconfirmed
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user_id: Uuid,
    pub email: String,
    pub session: Option<AuthSession>,
}

impl SignUpOutcome {
    pub fn needs_confirmation(&self) -> bool {
        self.session.is_none()
    }
}

/// External identity service
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> Result<()>;
}

/// GoTrue-compatible HTTP provider
pub struct HttpAuthProvider {
    client: reqwest::Client,
    base_url: String,
    anon_key: Option<String>,
}

impl HttpAuthProvider {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build auth client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.provider_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match self.anon_key {
            Some(ref key) => request.header("apikey", key),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(reqwest::StatusCode, Value)> {
        let response = request.send().await.map_err(|e| AppError::AuthProvider {
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| AppError::AuthProvider {
            message: e.to_string(),
        })?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok((status, body))
    }
}

/// Human-readable message from a provider error body
fn provider_message(body: &Value, fallback: &str) -> String {
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .unwrap_or(fallback)
        .to_string()
}

fn parse_user_id(value: &Value) -> Result<Uuid> {
    value
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| AppError::AuthProvider {
            message: "Auth provider returned no user id".to_string(),
        })
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        let request = self
            .request("/auth/v1/signup")
            .json(&serde_json::json!({ "email": email, "password": password }));
        let (status, body) = self.send(request).await?;

        if status.is_server_error() {
            return Err(AppError::AuthProvider {
                message: provider_message(&body, "Registration failed"),
            });
        }
        if !status.is_success() {
            return Err(AppError::AuthRejected {
                message: provider_message(&body, "Registration failed"),
            });
        }

        // With auto-confirm the provider answers with a session, otherwise
        // with the bare user object.
        let user = body.get("user").unwrap_or(&body);
        let user_id = parse_user_id(&user["id"])?;
        let session = body
            .get("access_token")
            .and_then(Value::as_str)
            .map(|token| AuthSession {
                user_id,
                access_token: token.to_string(),
            });

        Ok(SignUpOutcome {
            user_id,
            email: user["email"].as_str().unwrap_or(email).to_string(),
            session,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let request = self
            .request("/auth/v1/token?grant_type=password")
            .json(&serde_json::json!({ "email": email, "password": password }));
        let (status, body) = self.send(request).await?;

        if status.is_server_error() {
            return Err(AppError::AuthProvider {
                message: provider_message(&body, "Login failed"),
            });
        }
        if !status.is_success() {
            return Err(AppError::Unauthorized {
                message: provider_message(&body, "Invalid login credentials"),
            });
        }

        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| AppError::AuthProvider {
                message: "Auth provider returned no access token".to_string(),
            })?
            .to_string();

        Ok(AuthSession {
            user_id: parse_user_id(&body["user"]["id"])?,
            access_token,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let request = self.request("/auth/v1/logout").bearer_auth(access_token);
        let (status, body) = self.send(request).await?;

        if !status.is_success() {
            return Err(AppError::AuthRejected {
                message: provider_message(&body, "Logout failed"),
            });
        }
        Ok(())
    }
}

/// Local provider keeping users in memory and issuing tokens itself
pub struct InMemoryAuthProvider {
    jwt: Arc<JwtManager>,
    users: Mutex<HashMap<String, (Uuid, String)>>,
}

impl InMemoryAuthProvider {
    pub fn new(jwt: Arc<JwtManager>) -> Self {
        Self {
            jwt,
            users: Mutex::new(HashMap::new()),
        }
    }

    fn users(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (Uuid, String)>>> {
        self.users.lock().map_err(|_| AppError::Internal {
            message: "auth user table lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl AuthProvider for InMemoryAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        let email = email.to_lowercase();
        let user_id = {
            let mut users = self.users()?;
            if users.contains_key(&email) {
                return Err(AppError::AuthRejected {
                    message: "User already registered".to_string(),
                });
            }
            let user_id = Uuid::new_v4();
            users.insert(email.clone(), (user_id, hash_secret(password)));
            user_id
        };

        let access_token = self.jwt.generate_token(user_id, Some(&email))?;
        Ok(SignUpOutcome {
            user_id,
            email,
            session: Some(AuthSession { user_id, access_token }),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = email.to_lowercase();
        let user_id = self
            .users()?
            .get(&email)
            .filter(|(_, hash)| *hash == hash_secret(password))
            .map(|(id, _)| *id)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Invalid login credentials".to_string(),
            })?;

        Ok(AuthSession {
            user_id,
            access_token: self.jwt.generate_token(user_id, Some(&email))?,
        })
    }

    async fn sign_out(&self, _access_token: &str) -> Result<()> {
        Ok(())
    }
}

/// Create the auth provider selected by configuration
pub fn create_auth_provider(config: &AuthConfig, jwt: Arc<JwtManager>) -> Result<Arc<dyn AuthProvider>> {
    match config.provider.as_str() {
        "memory" => {
            tracing::warn!("Using in-memory auth provider; accounts are lost on restart");
            Ok(Arc::new(InMemoryAuthProvider::new(jwt)))
        }
        "gotrue" => Ok(Arc::new(HttpAuthProvider::new(config)?)),
        other => Err(AppError::Configuration {
            message: format!("Unknown auth provider: {}", other),
        }),
    }
}
