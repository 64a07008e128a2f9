//! JSON body extractor.
//!
//! `axum::Json` rejects with a plain-text body. `ApiJson<T>` runs the same
//! extraction but rejects with `{"error": ..., "message": ...}` so clients
//! see one error shape for every failure.

use axum::extract::FromRequest;

use crate::error::ApiError;

/// `Json<T>` that rejects with [`ApiError`].
///
/// ```rust,ignore
/// async fn allocate(ApiJson(req): ApiJson<AllocateRequest>) -> ApiResult<impl IntoResponse> {
///     // ...
/// }
/// ```
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use axum::{body::Body, http::Request};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Named {
        #[allow(dead_code)]
        name: String,
    }

    fn json_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_input() {
        let result = ApiJson::<Named>::from_request(json_request("{not json"), &()).await;
        assert_eq!(result.err().map(|e| e.code), Some(ErrorCode::InvalidInput));
    }

    #[tokio::test]
    async fn test_valid_body_extracts() {
        let result = ApiJson::<Named>::from_request(json_request(r#"{"name":"x"}"#), &()).await;
        assert!(result.is_ok());
    }
}
