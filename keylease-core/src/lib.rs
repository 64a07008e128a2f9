//! KEYLEASE Core - Entity Types
//!
//! Shared types for sharing a small pool of rate-limited API keys across
//! many concurrent interview sessions, plus the metadata model for chunked
//! recording uploads. Storage and HTTP live in other crates.

mod error;
mod identity;
mod lease;
mod policy;
mod provider;
mod resource;
mod upload;

pub use error::*;
pub use identity::*;
pub use lease::*;
pub use policy::*;
pub use provider::*;
pub use resource::*;
pub use upload::*;
