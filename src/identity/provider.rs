use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use super::principal::{normalize_email, Principal, Role};
use super::session::{Session, SessionManager};
use crate::storage::{Document, SetMode, SharedStore, StoreError};

/// Password hashes, kept apart from the backed-up `users` collection so a
/// restore never touches credentials.
pub const CREDENTIALS_COLLECTION: &str = "_credentials";
pub const USERS_COLLECTION: &str = "users";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("random source unavailable: {0}")]
    Random(#[from] getrandom::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
    pub principal: Principal,
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> Result<LoginResponse, AuthError>;

    /// Resolve a session token to its principal, with the role as stored now.
    fn principal_for_token(&self, token: &str) -> Result<Option<Principal>, AuthError>;

    fn logout(&self, token: &str) -> bool;
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AuthError::Hash(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hash(e.to_string()))?;
    let phc = Argon2::default().hash_password(password.as_bytes(), &salt).map_err(|e| AuthError::Hash(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Auth backed by the document store: Argon2 hashes under `_credentials`,
/// role and profile under `users/<email>`.
#[derive(Clone)]
pub struct StoreAuthProvider {
    store: SharedStore,
    sm: SessionManager,
}

impl StoreAuthProvider {
    pub fn new(store: SharedStore, sm: SessionManager) -> Self { Self { store, sm } }

    pub fn sessions(&self) -> &SessionManager { &self.sm }

    /// Profile for a user id; `None` when there is no `users` document.
    pub fn principal(&self, user_id: &str) -> Result<Option<Principal>, AuthError> {
        let Some(doc) = self.store.get(USERS_COLLECTION, user_id)? else { return Ok(None); };
        let role = doc.get("role").and_then(|v| v.as_str()).map(Role::parse).unwrap_or_default();
        let email = doc.get("email").and_then(|v| v.as_str()).map(normalize_email).unwrap_or_else(|| user_id.to_string());
        Ok(Some(Principal {
            id: user_id.to_string(),
            email,
            role,
            name: doc.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()),
        }))
    }

    pub fn set_password(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let mut doc = Document::new();
        doc.insert("passwordHash".into(), json!(hash_password(password)?));
        self.store.set(CREDENTIALS_COLLECTION, &normalize_email(email), doc, SetMode::Merge)?;
        Ok(())
    }

    /// Make sure `email` can log in as an administrator. An existing password is
    /// kept; the `users` document is created or promoted to `admin`.
    pub fn ensure_admin(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let id = normalize_email(email);
        if self.store.get(CREDENTIALS_COLLECTION, &id)?.is_none() {
            self.set_password(&id, password)?;
            info!(target: "auth", user = %id, "bootstrap admin credentials created");
        }
        let mut profile = Document::new();
        profile.insert("email".into(), json!(id));
        profile.insert("role".into(), json!("admin"));
        self.store.set(USERS_COLLECTION, &id, profile, SetMode::Merge)?;
        Ok(())
    }
}

impl AuthProvider for StoreAuthProvider {
    fn login(&self, req: &LoginRequest) -> Result<LoginResponse, AuthError> {
        let id = normalize_email(&req.email);
        if id.is_empty() { return Err(AuthError::InvalidCredentials); }
        let hash = self.store.get(CREDENTIALS_COLLECTION, &id)?
            .and_then(|d| d.get("passwordHash").and_then(|v| v.as_str()).map(|s| s.to_string()));
        let Some(phc) = hash else {
            warn!(target: "auth", user = %id, "login for unknown user");
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(&phc, &req.password) {
            warn!(target: "auth", user = %id, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        let principal = self.principal(&id)?.unwrap_or(Principal { id: id.clone(), email: id.clone(), role: Role::Fan, name: None });
        let session = self.sm.issue(&id)?;
        info!(target: "auth", user = %id, role = ?principal.role, "login");
        Ok(LoginResponse { session, principal })
    }

    fn principal_for_token(&self, token: &str) -> Result<Option<Principal>, AuthError> {
        let Some(user_id) = self.sm.validate(token) else { return Ok(None); };
        self.principal(&user_id)
    }

    fn logout(&self, token: &str) -> bool { self.sm.logout(token) }
}
