//! Error Types for KEYLEASE API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as `{"error": CODE, "message": ..., "details": ...}`
//! with the HTTP status code belonging to the code.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keylease_core::{
    EntityKind, KeyleaseError, PoolError, ProviderError, StorageError, UploadError,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field format is incorrect
    InvalidFormat,

    /// Finalize found fewer (or more) chunks than declared
    MissingChunks,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested entity does not exist
    EntityNotFound,

    /// Lease is missing or no longer active
    LeaseNotFound,

    /// API key index is not part of the pool
    KeyNotFound,

    /// No chunks were ever received for the upload
    UploadNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Upload was already finalized and takes no more chunks
    UploadFinalized,

    // ========================================================================
    // Size and Capacity Errors (413, 429)
    // ========================================================================
    /// Chunk payload exceeds the size limit
    PayloadTooLarge,

    /// Every pooled key is at capacity
    PoolExhausted,

    // ========================================================================
    // Server Errors (500, 502, 503, 504)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Database operation failed
    DatabaseError,

    /// External provider returned an error
    UpstreamError,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Database connection pool exhausted
    ConnectionPoolExhausted,

    /// Operation timed out
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidFormat
            | ErrorCode::MissingChunks => StatusCode::BAD_REQUEST,

            ErrorCode::EntityNotFound
            | ErrorCode::LeaseNotFound
            | ErrorCode::KeyNotFound
            | ErrorCode::UploadNotFound => StatusCode::NOT_FOUND,

            ErrorCode::UploadFinalized => StatusCode::CONFLICT,

            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,

            ErrorCode::PoolExhausted => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,

            ErrorCode::ServiceUnavailable
            | ErrorCode::ConnectionPoolExhausted => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::InternalError
            | ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::MissingChunks => "Missing chunks",

            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::LeaseNotFound => "Session not found or not active",
            ErrorCode::KeyNotFound => "API key not found",
            ErrorCode::UploadNotFound => "Upload not found",
            ErrorCode::UploadFinalized => "Upload already finalized",

            ErrorCode::PayloadTooLarge => "Chunk too large",
            ErrorCode::PoolExhausted => {
                "All API keys are at maximum capacity. Please try again later."
            }

            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::UpstreamError => "Upstream provider request failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::ConnectionPoolExhausted => "Connection pool exhausted",
            ErrorCode::Timeout => "Operation timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiError {
    /// Error code categorizing the error
    #[serde(rename = "error")]
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (field errors, counts, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create a ValidationFailed error.
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a MissingField error.
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
        .with_details(serde_json::json!({ "field": field }))
    }

    /// Create an InvalidFormat error.
    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    /// Create a MissingChunks error naming both counts.
    pub fn missing_chunks(upload_id: &str, expected: u32, found: u32) -> Self {
        Self::new(
            ErrorCode::MissingChunks,
            format!("Expected {} chunks, found {}", expected, found),
        )
        .with_details(serde_json::json!({
            "uploadId": upload_id,
            "expected": expected,
            "found": found,
        }))
    }

    /// Create an EntityNotFound error.
    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    /// Create a LeaseNotFound error.
    pub fn lease_not_found(lease_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::LeaseNotFound,
            format!("Session {} not found or not active", lease_id),
        )
    }

    /// Create a KeyNotFound error.
    pub fn key_not_found(key_index: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::KeyNotFound,
            format!("API key {} is not part of the pool", key_index),
        )
    }

    /// Create an UploadNotFound error.
    pub fn upload_not_found(upload_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UploadNotFound,
            format!("Upload {} not found", upload_id),
        )
    }

    /// Create an UploadFinalized error.
    pub fn upload_finalized(upload_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UploadFinalized,
            format!("Upload {} is already finalized", upload_id),
        )
    }

    /// Create a PayloadTooLarge error.
    pub fn payload_too_large(size: usize, limit: usize) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("Chunk too large: {} bytes exceeds limit of {} bytes", size, limit),
        )
        .with_details(serde_json::json!({ "size": size, "limit": limit }))
    }

    /// Create a PoolExhausted error.
    pub fn pool_exhausted() -> Self {
        Self::from_code(ErrorCode::PoolExhausted)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a DatabaseError.
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Create an UpstreamError.
    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamError, message)
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Create a ConnectionPoolExhausted error.
    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }

    /// Create a Timeout error.
    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Implement IntoResponse for ApiError to enable automatic error handling in Axum.
///
/// ```ignore
/// async fn handler() -> Result<Json<Response>, ApiError> {
///     Err(ApiError::pool_exhausted())
/// }
/// ```
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<KeyleaseError> for ApiError {
    fn from(err: KeyleaseError) -> Self {
        match err {
            KeyleaseError::Storage(e) => e.into(),
            KeyleaseError::Validation(e) => e.into(),
            KeyleaseError::Pool(e) => e.into(),
            KeyleaseError::Upload(e) => e.into(),
            KeyleaseError::Provider(e) => e.into(),
            KeyleaseError::Config(e) => {
                tracing::error!(error = %e, "Configuration error");
                ApiError::internal_error(e.to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound {
                entity: EntityKind::Lease,
                id,
            } => ApiError::lease_not_found(id),
            StorageError::NotFound {
                entity: EntityKind::Upload,
                id,
            } => ApiError::upload_not_found(id),
            StorageError::NotFound { entity, id } => {
                ApiError::entity_not_found(&format!("{:?}", entity), id)
            }
            StorageError::Unavailable { reason } => {
                tracing::error!(reason = %reason, "Storage unavailable");
                ApiError::service_unavailable("Storage temporarily unavailable")
            }
            other => {
                // Log the full error, return a generic one
                tracing::error!(error = %other, "Storage error");
                ApiError::database_error("Database operation failed")
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::RequiredFieldMissing { field } => ApiError::missing_field(&field),
            ValidationError::InvalidValue { field, reason } => {
                ApiError::invalid_input(format!("Invalid value for {}: {}", field, reason))
                    .with_details(serde_json::json!({ "field": field }))
            }
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { capacity } => ApiError::pool_exhausted()
                .with_details(serde_json::json!({ "capacityPerKey": capacity })),
            PoolError::LeaseNotActive { lease_id } => ApiError::lease_not_found(lease_id),
            PoolError::UnknownKey { key_index } => ApiError::key_not_found(key_index),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::MissingChunks {
                upload_id,
                expected,
                found,
            } => ApiError::missing_chunks(&upload_id, expected, found),
            UploadError::ChunkTooLarge { size, limit } => ApiError::payload_too_large(size, limit),
            UploadError::InvalidPayload { reason } => {
                ApiError::invalid_format("chunkData", &format!("base64 ({})", reason))
            }
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        tracing::warn!(error = %err, "Provider error");
        match err {
            ProviderError::NotConfigured { key_index } => ApiError::service_unavailable(format!(
                "No credentials configured for API key {}",
                key_index
            )),
            other => ApiError::upstream_error(other.to_string()),
        }
    }
}

/// Convert from tokio_postgres::Error to ApiError.
impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        ApiError::database_error("Database operation failed")
    }
}

/// Convert from deadpool_postgres::PoolError to ApiError.
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => ApiError::connection_pool_exhausted(),
            deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Database connection pool is closed")
            }
            _ => ApiError::database_error("Failed to acquire database connection"),
        }
    }
}

/// Convert a rejected JSON body into the API error shape.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::new(ErrorCode::PayloadTooLarge, rejection.body_text());
        }
        ApiError::invalid_input(rejection.body_text())
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
