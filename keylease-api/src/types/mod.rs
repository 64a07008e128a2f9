//! API Request and Response Types
//!
//! Wire types for the KEYLEASE HTTP surface. Field names are camelCase on
//! the wire; domain types from keylease-core are converted at the edge.

// Lease types
mod lease;
pub use lease::*;

// Pool types
mod pool;
pub use pool::*;

// Upload types
mod upload;
pub use upload::*;
