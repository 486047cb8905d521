//! Unified application error model and mapping helpers.
//! Every operation in the service returns `AppResult<T>`; the HTTP layer turns an
//! `AppError` into a status code plus a stable JSON body via `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// One violated field constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self { field: field.into(), reason: reason.into() }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldViolation>),
    #[error("an account with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("registration number '{0}' already exists")]
    DuplicateRegistrationNumber(String),
    #[error("field '{0}' cannot be changed")]
    ImmutableField(String),
    #[error("{0}")]
    InvalidExternalToken(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Unexpected server fault. The detail is logged, never sent to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

fn summarize(v: &[FieldViolation]) -> String {
    v.iter().map(|fv| format!("{} {}", fv.field, fv.reason)).collect::<Vec<_>>().join("; ")
}

impl AppError {
    pub fn unauthenticated<S: Into<String>>(msg: S) -> Self { AppError::Unauthenticated(msg.into()) }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self { AppError::Forbidden(msg.into()) }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AppError::NotFound(msg.into()) }
    pub fn external<S: Into<String>>(msg: S) -> Self { AppError::InvalidExternalToken(msg.into()) }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AppError::Internal(msg.into()) }

    pub fn invalid(field: &str, reason: &str) -> Self {
        AppError::Validation(vec![FieldViolation::new(field, reason)])
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::DuplicateEmail(_) => "duplicate_email",
            AppError::DuplicateRegistrationNumber(_) => "duplicate_registration_number",
            AppError::ImmutableField(_) => "immutable_field_violation",
            AppError::InvalidExternalToken(_) => "invalid_external_token",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Client-facing message. Internal faults collapse to a fixed string.
    pub fn message(&self) -> String {
        match self {
            AppError::Internal(_) => "server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            AppError::Validation(v) => v.as_slice(),
            _ => &[],
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Unauthenticated(_) => 401,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Validation(_) => 400,
            AppError::DuplicateEmail(_) | AppError::DuplicateRegistrationNumber(_) => 409,
            AppError::ImmutableField(_) => 400,
            AppError::InvalidExternalToken(_) => 401,
            AppError::InvalidCredentials => 401,
            AppError::Internal(_) => 500,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    msg: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<FieldViolation>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(detail) = &self {
            tracing::error!(target: "regdesk::http", error = %detail, "request failed with internal error");
        }
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.code_str(),
            msg: self.message(),
            violations: self.violations().to_vec(),
        };
        (status, Json(body)).into_response()
    }
}
