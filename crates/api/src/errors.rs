//! JSON error responses.

use std::collections::BTreeMap;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use versenotes_auth::StoreError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn server_error() -> Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "the server encountered a problem and could not process your request",
    )
}

pub fn not_found() -> Response {
    json_error(
        StatusCode::NOT_FOUND,
        "not_found",
        "the requested resource could not be found",
    )
}

pub fn invalid_auth_token() -> Response {
    let mut res = json_error(
        StatusCode::UNAUTHORIZED,
        "invalid_token",
        "invalid or expired authentication token",
    );
    res.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Bearer"),
    );
    res
}

pub fn authentication_required() -> Response {
    json_error(
        StatusCode::UNAUTHORIZED,
        "authentication_required",
        "you must be authenticated to access this resource",
    )
}

pub fn inactive_account() -> Response {
    json_error(
        StatusCode::FORBIDDEN,
        "inactive_account",
        "your user account must be activated to access this resource",
    )
}

pub fn invalid_credentials() -> Response {
    json_error(
        StatusCode::UNAUTHORIZED,
        "invalid_credentials",
        "invalid authentication credentials",
    )
}

pub fn rate_limited(retry_after_ms: u64) -> Response {
    let mut res = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "rate_limit_exceeded",
            "message": "rate limit exceeded",
            "retry_after_ms": retry_after_ms,
        })),
    )
        .into_response();

    let retry_after_secs = retry_after_ms.div_ceil(1000);
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        res.headers_mut().insert(header::RETRY_AFTER, value);
    }
    res
}

pub fn failed_validation(fields: BTreeMap<&'static str, String>) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "error": "validation_failed",
            "fields": fields,
        })),
    )
        .into_response()
}

/// Store failures on the request path: conflicts are the caller's fault,
/// everything else is ours.
pub fn store_error(err: StoreError) -> Response {
    match err {
        StoreError::DuplicateEmail => {
            let mut fields = BTreeMap::new();
            fields.insert("email", "a user with this email address already exists".to_string());
            failed_validation(fields)
        }
        other => {
            tracing::error!(error = %other, "database operation failed");
            server_error()
        }
    }
}
