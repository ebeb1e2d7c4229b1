//! User lifecycle: registration, activation, password reset.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use versenotes_auth::token::is_well_formed;
use versenotes_auth::{password, Scope, Token};
use versenotes_scheduler::{ActivationMail, Task, TaskKind};

use crate::errors;
use crate::state::AppState;
use crate::validation::{validate_email, validate_password, validate_username, Validator};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Response {
    let mut v = Validator::new();
    validate_username(&mut v, &body.username);
    validate_email(&mut v, &body.email);
    validate_password(&mut v, &body.password);
    if let Err(res) = v.finish() {
        return res;
    }

    let password_hash = {
        let password = body.password.clone();
        match tokio::task::spawn_blocking(move || password::hash_password(&password)).await {
            Ok(Ok(hash)) => hash,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "password hashing failed");
                return errors::server_error();
            }
            Err(err) => {
                tracing::error!(error = %err, "password hashing task failed");
                return errors::server_error();
            }
        }
    };

    let now = state.clock.now();
    let user = match state
        .users
        .insert(&body.username, &body.email, &password_hash, now)
        .await
    {
        Ok(user) => user,
        Err(err) => return errors::store_error(err),
    };

    let token = Token::new(user.id, Scope::Activation, now);
    if let Err(err) = state.tokens.insert(&token).await {
        return errors::store_error(err);
    }

    let task = Task::new(
        TaskKind::ActivationMail(ActivationMail {
            username: user.username.clone(),
            email: user.email.clone(),
            activation_url: format!(
                "{}/v1/users/activated/{}",
                state.config.base_url, token.plaintext
            ),
        }),
        3,
        now,
    );

    // Submission can block on a full ingress channel; keep it off the
    // request path.
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let Err(err) = scheduler.submit(task).await {
            tracing::error!(error = %err, "failed to submit welcome mail task");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "user": {
                "id": user.id.get(),
                "username": user.username,
                "email": user.email,
                "activated": user.activated,
                "created_at": user.created_at,
            }
        })),
    )
        .into_response()
}

pub async fn activate(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    if !is_well_formed(&token) {
        return invalid_activation_token();
    }

    let now = state.clock.now();
    let hash = versenotes_auth::token::hash_token(&token);
    let user_id = match state
        .tokens
        .find_user_for_token(Scope::Activation, &hash, now)
        .await
    {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return invalid_activation_token(),
        Err(err) => return errors::store_error(err),
    };

    if let Err(err) = state.users.set_activated(user_id).await {
        return errors::store_error(err);
    }
    if let Err(err) = state
        .tokens
        .delete_all_for_user(Scope::Activation, user_id)
        .await
    {
        return errors::store_error(err);
    }

    (
        StatusCode::OK,
        Json(json!({ "message": "your account has been activated" })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub token: String,
    pub password: String,
}

pub async fn update_password(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdatePasswordRequest>,
) -> Response {
    let mut v = Validator::new();
    validate_password(&mut v, &body.password);
    v.check(
        is_well_formed(&body.token),
        "token",
        "must be 26 bytes long",
    );
    if let Err(res) = v.finish() {
        return res;
    }

    let now = state.clock.now();
    let hash = versenotes_auth::token::hash_token(&body.token);
    let user_id = match state
        .tokens
        .find_user_for_token(Scope::PasswordReset, &hash, now)
        .await
    {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_token",
                "invalid or expired password reset token",
            )
        }
        Err(err) => return errors::store_error(err),
    };

    let password_hash = {
        let password = body.password.clone();
        match tokio::task::spawn_blocking(move || password::hash_password(&password)).await {
            Ok(Ok(hash)) => hash,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "password hashing failed");
                return errors::server_error();
            }
            Err(err) => {
                tracing::error!(error = %err, "password hashing task failed");
                return errors::server_error();
            }
        }
    };

    if let Err(err) = state.users.set_password_hash(user_id, &password_hash).await {
        return errors::store_error(err);
    }
    if let Err(err) = state
        .tokens
        .delete_all_for_user(Scope::PasswordReset, user_id)
        .await
    {
        return errors::store_error(err);
    }

    (
        StatusCode::OK,
        Json(json!({ "message": "your password was successfully reset" })),
    )
        .into_response()
}

fn invalid_activation_token() -> Response {
    errors::json_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "invalid_token",
        "invalid or expired activation token",
    )
}
