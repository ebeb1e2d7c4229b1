//! Router assembly.

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use versenotes_ratelimit::Action;

use crate::middleware::{authenticate, rate_limit, require_activated, RateLimitState};
use crate::routes::{notes, system, tokens, users};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .cors_trusted_origin
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:9000")),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Credential-minting routes carry the strictest budget and fail closed.
    let auth_limited = Router::new()
        .route("/v1/users", post(users::register))
        .route(
            "/v1/tokens/authentication",
            post(tokens::create_authentication_token)
                .delete(tokens::delete_authentication_token),
        )
        .route("/v1/tokens/activation", post(tokens::create_activation_token))
        .route(
            "/v1/tokens/password-reset",
            post(tokens::create_password_reset_token),
        )
        .layer(from_fn_with_state(
            RateLimitState {
                limiters: state.limiters.clone(),
                action: Action::Auth,
            },
            rate_limit,
        ));

    // The note write class requires an activated account.
    let note_limited = Router::new()
        .route("/v1/notes", post(notes::create_note).get(notes::list_notes))
        .route("/v1/notes/:id", delete(notes::delete_note))
        .layer(from_fn(require_activated))
        .layer(from_fn_with_state(
            RateLimitState {
                limiters: state.limiters.clone(),
                action: Action::Note,
            },
            rate_limit,
        ));

    Router::new()
        .route("/v1/healthcheck", get(system::healthcheck))
        .route("/v1/users/activated/:token", put(users::activate))
        .route("/v1/users/password", put(users::update_password))
        .merge(auth_limited)
        .merge(note_limited)
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn_with_state(
            RateLimitState {
                limiters: state.limiters.clone(),
                action: Action::Ip,
            },
            rate_limit,
        ))
        .layer(cors)
        .with_state(state)
}
