use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::model::InvalidTimestamp;

/// One failed check on an input payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<Issue>,
}

impl ValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::default();
        error.push(path, message);
        error
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Returns `value` when no issue was recorded.
    pub fn finish<T>(self, value: T) -> Result<T, Self> {
        if self.issues.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

fn summarize(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.path, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error codes of the RPC wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    ParseError,
    BadRequest,
    Unauthorized,
    NotFound,
    MethodNotSupported,
    InternalServerError,
}

impl RpcCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcCode::ParseError => "PARSE_ERROR",
            RpcCode::BadRequest => "BAD_REQUEST",
            RpcCode::Unauthorized => "UNAUTHORIZED",
            RpcCode::NotFound => "NOT_FOUND",
            RpcCode::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            RpcCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn json_rpc_code(self) -> i32 {
        match self {
            RpcCode::ParseError => -32700,
            RpcCode::BadRequest => -32600,
            RpcCode::Unauthorized => -32001,
            RpcCode::NotFound => -32004,
            RpcCode::MethodNotSupported => -32005,
            RpcCode::InternalServerError => -32603,
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            RpcCode::ParseError | RpcCode::BadRequest => StatusCode::BAD_REQUEST,
            RpcCode::Unauthorized => StatusCode::UNAUTHORIZED,
            RpcCode::NotFound => StatusCode::NOT_FOUND,
            RpcCode::MethodNotSupported => StatusCode::METHOD_NOT_ALLOWED,
            RpcCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Malformed request: {0}")]
    Parse(String),

    #[error("You must be signed in to call this procedure")]
    Unauthenticated,

    // Absent and not-owned rows are reported identically.
    #[error("Todo not found")]
    NotFound,

    #[error("No procedure found on path \"{0}\"")]
    ProcedureNotFound(String),

    #[error("Unsupported method for procedure \"{0}\"")]
    MethodNotSupported(String),

    #[error("Store failure: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> RpcCode {
        match self {
            AppError::Validation(_) => RpcCode::BadRequest,
            AppError::Parse(_) => RpcCode::ParseError,
            AppError::Unauthenticated => RpcCode::Unauthorized,
            AppError::NotFound | AppError::ProcedureNotFound(_) => RpcCode::NotFound,
            AppError::MethodNotSupported(_) => RpcCode::MethodNotSupported,
            AppError::Store(_) | AppError::Internal(_) => RpcCode::InternalServerError,
        }
    }

    /// Message safe to hand to a client; backend faults stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Store(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_server_fault(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::Internal(_))
    }
}

impl From<InvalidTimestamp> for AppError {
    fn from(e: InvalidTimestamp) -> Self {
        AppError::Internal(e.to_string())
    }
}

/// Failures of the auth sub-application.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid JSON body: {0}")]
    MalformedBody(String),

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Unauthorized")]
    Unauthenticated,

    #[error("Store failure: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<InvalidTimestamp> for AuthError {
    fn from(e: InvalidTimestamp) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AuthError::MalformedBody(_) => (StatusCode::BAD_REQUEST, "INVALID_BODY"),
            AuthError::UserAlreadyExists => {
                (StatusCode::UNPROCESSABLE_ENTITY, "USER_ALREADY_EXISTS")
            }
            AuthError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "INVALID_EMAIL_OR_PASSWORD")
            }
            AuthError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AuthError::Store(_) | AuthError::Internal(_) => {
                tracing::error!(error = %self, "Authentication error");
                return auth_failure_response();
            }
        };

        let mut body = json!({ "message": self.to_string(), "code": code });
        if let AuthError::Validation(validation) = &self {
            body["issues"] = json!(validation.issues);
        }

        (status, Json(body)).into_response()
    }
}

/// The generic response for any fault inside the auth sub-application.
pub fn auth_failure_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Internal authentication error",
            "code": "AUTH_FAILURE",
        })),
    )
        .into_response()
}

/// Panic handler for the auth sub-application.
pub fn auth_panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "Authentication handler panicked");

    auth_failure_response()
}
