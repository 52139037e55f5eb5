//! HTTP-facing error model.
//! Domain errors (store, auth, validation, import) are mapped here into a
//! status code plus a stable `code` string. Internal detail stays in the
//! server log; clients only see the code and a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::error;

use crate::backup::ImportError;
use crate::identity::AuthError;
use crate::storage::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    Auth { code: String, message: String },
    Forbidden { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    pub fn unauthorized() -> Self { Self::auth("UNAUTHORIZED", "Unauthorized") }
    pub fn forbidden_admin() -> Self { Self::forbidden("FORBIDDEN", "Forbidden") }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::Auth { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({ "error": self.code_str(), "message": self.message() }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unauthenticated(_) => AppError::unauthorized(),
            StoreError::PermissionDenied(_) => AppError::forbidden_admin(),
            other => {
                error!(target: "http", "store failure: {}", other);
                AppError::internal("STORE_FAILURE", "Internal error")
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized => AppError::unauthorized(),
            AuthError::Forbidden => AppError::forbidden_admin(),
            AuthError::InvalidCredentials => AppError::auth("INVALID_CREDENTIALS", "Invalid email or password"),
            AuthError::Store(e) => e.into(),
            AuthError::Hash(e) => {
                error!(target: "auth", "password hashing failed: {}", e);
                AppError::internal("INTERNAL", "Internal error")
            }
            AuthError::Random(e) => {
                error!(target: "auth", "session token not issued: {}", e);
                AppError::internal("INTERNAL", "Internal error")
            }
        }
    }
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Validation(v) => AppError::user(v.code().to_string(), v.to_string()),
            ImportError::Unauthorized { .. } => AppError::unauthorized(),
            ImportError::Forbidden { .. } => AppError::forbidden_admin(),
            ImportError::Failed { .. } => AppError::internal("IMPORT_FAIL", "Error importing backup"),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(target: "http", "unexpected failure: {:#}", err);
        AppError::internal("INTERNAL", "Internal error")
    }
}
