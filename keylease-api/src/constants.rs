//! Constants for KEYLEASE API
//!
//! Centralized default values used throughout the API.

// ============================================================================
// CORS
// ============================================================================

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// UPLOADS
// ============================================================================

/// Largest accepted base64 chunk payload (80 MiB of text)
pub const MAX_CHUNK_BASE64_BYTES: usize = 80 * 1024 * 1024;

/// Request body limit; leaves room for the JSON envelope around a chunk
pub const DEFAULT_MAX_BODY_BYTES: usize = 96 * 1024 * 1024;

// ============================================================================
// POOL
// ============================================================================

/// Credit balances younger than this are not re-fetched (5 minutes)
pub const CREDIT_CHECK_MIN_INTERVAL_SECS: i64 = 5 * 60;

/// Number of voice API keys looked up in the environment when no count is set
pub const DEFAULT_MAX_POOL_KEYS: usize = 16;

/// Default timeout for outbound provider requests
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Default voice provider base URL
pub const DEFAULT_VOICE_API_BASE: &str = "https://api.elevenlabs.io";

// ============================================================================
// LEASE SWEEP JOB
// ============================================================================

/// How often the background sweep runs (60 seconds)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

// ============================================================================
// SERVER
// ============================================================================

/// Default listen port
pub const DEFAULT_API_PORT: u16 = 3000;
