//! Standardized error handling for the Relay API
//!
//! This module provides a consistent error response format across all endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "VALIDATION_ERROR", "NOT_FOUND")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Application error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    ValidationError { details: HashMap<String, Vec<String>> },
    InternalError(String),
    DatabaseError(String),
    ExternalServiceError { service: String, message: String },
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError(_) | Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExternalServiceError { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(resource) => format!("{} not found", resource),
            Self::Conflict(msg) => msg.clone(),
            Self::BadRequest(msg) => msg.clone(),
            Self::ValidationError { .. } => "Validation failed".to_string(),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "A database error occurred".to_string()
            }
            Self::ExternalServiceError { service, message } => {
                tracing::error!("External service error ({}): {}", service, message);
                format!("External service '{}' is unavailable", service)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = ApiError::new(self.error_code(), self.message());

        if let Self::ValidationError { details } = &self {
            error.details = Some(details.clone());
        }

        (status, Json(error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource".to_string()),
            _ => Self::DatabaseError(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();
        Self::ValidationError { details }
    }
}

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper to accumulate multiple validation errors
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.details
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
        self
    }

    pub fn build(self) -> Option<AppError> {
        if self.details.is_empty() {
            None
        } else {
            Some(AppError::ValidationError {
                details: self.details,
            })
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }
}

impl Default for ValidationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
