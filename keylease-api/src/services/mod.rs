//! Service Layer
//!
//! Business logic between the handlers and the store. Services validate
//! input, call the store, log and record metrics; response shaping stays
//! in `types`.

mod lease_service;
mod pool_service;
mod upload_service;

pub use lease_service::*;
pub use pool_service::*;
pub use upload_service::*;
