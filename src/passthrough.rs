//! Response pass-through hook on the GraphQL endpoints.
//!
//! Computes the identity of every GraphQL request and attaches it to the
//! request and response. Nothing is stored or looked up: this is not a cache.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Largest request body the hook buffers
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Identity of a GraphQL request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(pub String);

/// Key for a request: the normalized JSON body for POST, path and query otherwise
pub fn request_key(method: &Method, path_and_query: &str, body: &[u8]) -> RequestKey {
    if method == Method::POST {
        let key = serde_json::from_slice::<serde_json::Value>(body)
            .map(|json| json.to_string())
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
        RequestKey(key)
    } else {
        RequestKey(path_and_query.to_string())
    }
}

/// Middleware computing the [`RequestKey`] and calling through unchanged
pub async fn response_hook(request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let key = request_key(&parts.method, path_and_query, &bytes);
    debug!("GraphQL request key: {}", key.0);

    parts.extensions.insert(key.clone());
    let mut response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    response.extensions_mut().insert(key);
    response
}
