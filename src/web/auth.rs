//! Token authentication middleware.
//!
//! Clients present the API token as `Authorization: Bearer <token>`, as
//! `X-API-Key: <token>`, or as an `?api_key=` query parameter. When no
//! token is configured, authentication is disabled and every request
//! passes.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;
use crate::web::error::ApiError;

/// Auth settings shared with the router.
#[derive(Clone)]
pub struct AuthConfig {
    /// Expected token; `None` disables authentication.
    pub token: Option<String>,
}

pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.auth.token else {
        return next.run(request).await;
    };

    let presented = extract_token(request.headers(), request.uri().query());
    match presented {
        Some(token) if token == *expected => next.run(request).await,
        _ => ApiError::unauthorized().into_response(),
    }
}

/// Pull the token from headers or the query string, in precedence order.
fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(value.trim().to_owned());
    }

    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_owned());
    }

    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("api_key=").map(|v| v.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret-1"),
        );
        headers.insert("x-api-key", HeaderValue::from_static("secret-2"));
        assert_eq!(
            extract_token(&headers, Some("api_key=secret-3")),
            Some("secret-1".to_owned())
        );
    }

    #[test]
    fn api_key_header_then_query() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret-2"));
        assert_eq!(
            extract_token(&headers, None),
            Some("secret-2".to_owned())
        );

        let headers = HeaderMap::new();
        assert_eq!(
            extract_token(&headers, Some("page=1&api_key=secret-3")),
            Some("secret-3".to_owned())
        );
    }

    #[test]
    fn missing_token_is_none() {
        assert_eq!(extract_token(&HeaderMap::new(), Some("page=1")), None);
        assert_eq!(extract_token(&HeaderMap::new(), None), None);
    }
}
