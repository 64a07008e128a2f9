//! Request extractors that reject with `ApiError`.

mod json;

pub use json::ApiJson;
