//! Error types for leasing and upload operations

use crate::{KeyIndex, LeaseId};
use thiserror::Error;

/// Kinds of persisted records, used to label storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Resource,
    Lease,
    Chunk,
    Upload,
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity:?} with id {id}")]
    NotFound { entity: EntityKind, id: String },

    #[error("Insert failed for {entity:?}: {reason}")]
    InsertFailed { entity: EntityKind, reason: String },

    #[error("Update failed for {entity:?} with id {id}: {reason}")]
    UpdateFailed {
        entity: EntityKind,
        id: String,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Stored value is corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Request validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Pool and lease lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("All API keys are at maximum capacity ({capacity} active leases each)")]
    Exhausted { capacity: i32 },

    #[error("Lease {lease_id} not found or not active")]
    LeaseNotActive { lease_id: LeaseId },

    #[error("API key {key_index} is not part of the pool")]
    UnknownKey { key_index: KeyIndex },
}

/// Chunked upload errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Expected {expected} chunks, found {found}")]
    MissingChunks {
        upload_id: String,
        expected: u32,
        found: u32,
    },

    #[error("Chunk too large: {size} bytes exceeds limit of {limit} bytes")]
    ChunkTooLarge { size: usize, limit: usize },

    #[error("Chunk payload is not valid base64: {reason}")]
    InvalidPayload { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// External provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No credentials configured for API key {key_index}")]
    NotConfigured { key_index: KeyIndex },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Master error type for all keylease errors.
#[derive(Debug, Clone, Error)]
pub enum KeyleaseError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Result type alias for keylease operations.
pub type KeyleaseResult<T> = Result<T, KeyleaseError>;

// =============================================================================
// TESTS
// =============================================================================
