//! Request middleware: rate limiting and authentication.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use versenotes_auth::AuthError;
use versenotes_ratelimit::{Action, Limiters};

use crate::context::{BearerToken, Principal};
use crate::errors;
use crate::state::AppState;

/// State for one rate-limiting layer: the shared bundle plus the action
/// class the layer guards.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiters: Arc<Limiters>,
    pub action: Action,
}

pub async fn rate_limit(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let subject = client_ip(req.headers(), req.extensions().get::<ConnectInfo<SocketAddr>>());

    let decision = state.limiters.check(state.action, &subject).await;
    if !decision.allowed {
        return errors::rate_limited(decision.retry_after_ms);
    }

    next.run(req).await
}

/// Resolve the bearer token (if any) and attach a [`Principal`] to the
/// request. Requests without an Authorization header proceed as anonymous.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let principal = match req.headers().get(header::AUTHORIZATION).cloned() {
        None => Principal::Anonymous,
        Some(value) => {
            let Ok(value) = value.to_str() else {
                return errors::invalid_auth_token();
            };
            let Some(token) = value.strip_prefix("Bearer ") else {
                return errors::invalid_auth_token();
            };
            let token = token.trim();
            if token.is_empty() {
                return errors::invalid_auth_token();
            }

            match state.resolver.resolve(token).await {
                Ok(identity) => {
                    req.extensions_mut().insert(BearerToken(token.to_string()));
                    Principal::User(identity)
                }
                Err(AuthError::InvalidToken) => return errors::invalid_auth_token(),
                Err(err) => {
                    tracing::error!(error = %err, "token resolution failed");
                    return errors::server_error();
                }
            }
        }
    };

    req.extensions_mut().insert(principal);

    let mut res = next.run(req).await;
    res.headers_mut()
        .insert(header::VARY, HeaderValue::from_static("Authorization"));
    res
}

/// Reject anonymous and not-yet-activated callers.
pub async fn require_activated(req: Request, next: Next) -> Response {
    let principal = req
        .extensions()
        .get::<Principal>()
        .copied()
        .unwrap_or(Principal::Anonymous);

    match principal {
        Principal::Anonymous => errors::authentication_required(),
        Principal::User(identity) if !identity.activated => errors::inactive_account(),
        Principal::User(_) => next.run(req).await,
    }
}

/// Client address for rate-limit bucketing: the first `X-Forwarded-For`
/// hop, then `X-Real-IP`, then the socket peer.
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    connect_info
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    fn peer(addr: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(addr.parse().unwrap())
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let headers = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1, 10.0.0.2"),
            ("x-real-ip", "198.51.100.1"),
        ]);
        assert_eq!(
            client_ip(&headers, Some(&peer("192.0.2.1:9999"))),
            "203.0.113.7"
        );
    }

    #[test]
    fn real_ip_is_the_second_choice() {
        let headers = headers(&[("x-real-ip", "198.51.100.1")]);
        assert_eq!(
            client_ip(&headers, Some(&peer("192.0.2.1:9999"))),
            "198.51.100.1"
        );
    }

    #[test]
    fn socket_peer_is_the_fallback() {
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(&peer("192.0.2.1:9999"))),
            "192.0.2.1"
        );
    }

    #[test]
    fn missing_everything_is_unknown() {
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn empty_forwarded_header_falls_through() {
        let headers = headers(&[("x-forwarded-for", ""), ("x-real-ip", "198.51.100.1")]);
        assert_eq!(client_ip(&headers, None), "198.51.100.1");
    }
}
