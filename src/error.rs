//! Unified application error model and mapping helpers.
//! `AppError` is what HTTP handlers return; domain errors from the store and
//! account flows convert into it. `RouteError` is the routing taxonomy used by
//! the session router and route guard, each variant carrying its fallback.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::accounts::AccountError;
use crate::store::StoreError;
use crate::support::SupportError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Auth { code: String, message: String },
    Forbidden { code: String, message: String },
    Csrf { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Csrf { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::Csrf { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn csrf<S: Into<String>>(code: S, msg: S) -> Self { AppError::Csrf { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Auth { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::Csrf { .. } => 403,
            AppError::Io { .. } => 503,
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
        let body = serde_json::json!({
            "status": "error",
            "code": self.code_str(),
            "message": self.message(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound(_) => AppError::not_found("profile_not_found".to_string(), err.to_string()),
            StoreError::TicketNotFound(_) => AppError::not_found("ticket_not_found".to_string(), err.to_string()),
            StoreError::Io(_) | StoreError::Unavailable(_) => AppError::io("store_unavailable".to_string(), err.to_string()),
            StoreError::Serde(_) => AppError::internal("store_corrupt".to_string(), err.to_string()),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        let msg = err.to_string();
        match err {
            AccountError::InvalidEmail
            | AccountError::WeakPassword
            | AccountError::InvalidName
            | AccountError::InvalidAnswers(_) => AppError::user(err.code().to_string(), msg),
            AccountError::EmailTaken => AppError::conflict(err.code().to_string(), msg),
            AccountError::InvalidCredentials => AppError::auth(err.code().to_string(), msg),
            AccountError::ProfileNotFound(_) => AppError::not_found(err.code().to_string(), msg),
            AccountError::AdminOnboarding | AccountError::NotAdmin => AppError::forbidden(err.code().to_string(), msg),
            AccountError::Hash(_) => AppError::internal(err.code().to_string(), msg),
            AccountError::Store(inner) => AppError::from(inner),
        }
    }
}

impl From<SupportError> for AppError {
    fn from(err: SupportError) -> Self {
        let msg = err.to_string();
        match err {
            SupportError::InvalidTicket(_) | SupportError::InvalidProject(_) => AppError::user(err.code().to_string(), msg),
            SupportError::NotAllowed => AppError::forbidden(err.code().to_string(), msg),
            SupportError::Store(inner) => AppError::from(inner),
        }
    }
}

/// Why a navigation could not be authorized as requested.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("profile not found")]
    ProfileNotFound,
    #[error("profile fetch failed")]
    ProfileFetchFailed,
    #[error("redirect target rejected: {0}")]
    ValidationRejected(String),
}

impl RouteError {
    /// Where a navigation ends up after this error. Unknown state is treated
    /// as signed out; a rejected redirect target has no destination of its own.
    pub fn fallback_destination(&self) -> Option<&'static str> {
        match self {
            RouteError::NotAuthenticated | RouteError::ProfileFetchFailed => Some(crate::routing::LOGIN_PATH),
            RouteError::ProfileNotFound => Some(crate::routing::ONBOARDING_PATH),
            RouteError::ValidationRejected(_) => None,
        }
    }
}
