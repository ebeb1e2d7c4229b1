//! Token endpoints: login, logout, activation and password-reset requests.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use versenotes_auth::{password, Scope, Token, UserRecord};
use versenotes_scheduler::{PasswordResetMail, Task, TaskKind, TokenActivationMail};

use crate::context::{BearerToken, Principal};
use crate::errors;
use crate::state::AppState;
use crate::validation::{validate_email, validate_password, Validator};

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

pub async fn create_authentication_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsRequest>,
) -> Response {
    let mut v = Validator::new();
    validate_email(&mut v, &body.email);
    validate_password(&mut v, &body.password);
    if let Err(res) = v.finish() {
        return res;
    }

    let user = match state.users.get_by_email(&body.email).await {
        Ok(Some(user)) => user,
        Ok(None) => return errors::invalid_credentials(),
        Err(err) => return errors::store_error(err),
    };

    let matches = {
        let password = body.password.clone();
        let hashed = user.password_hash.clone();
        match tokio::task::spawn_blocking(move || password::verify_password(&password, &hashed))
            .await
        {
            Ok(Ok(matches)) => matches,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "password verification failed");
                return errors::server_error();
            }
            Err(err) => {
                tracing::error!(error = %err, "password verification task failed");
                return errors::server_error();
            }
        }
    };
    if !matches {
        return errors::invalid_credentials();
    }

    let now = state.clock.now();
    let token = Token::new(user.id, Scope::Authentication, now);
    if let Err(err) = state.tokens.insert(&token).await {
        return errors::store_error(err);
    }

    // Cache bind happens strictly after the database insert committed.
    state
        .resolver
        .bind(&token.plaintext, user.id, user.activated);

    (
        StatusCode::CREATED,
        Json(json!({
            "authentication_token": {
                "token": token.plaintext,
                "expiry": token.expiry,
            }
        })),
    )
        .into_response()
}

pub async fn delete_authentication_token(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    bearer: Option<Extension<BearerToken>>,
) -> Response {
    let Some(identity) = principal.identity() else {
        return errors::authentication_required();
    };

    if let Some(Extension(BearerToken(token))) = bearer {
        if let Err(err) = state.resolver.invalidate(&token).await {
            tracing::warn!(error = %err, "token cache invalidation failed");
        }
    }

    if let Err(err) = state
        .tokens
        .delete_all_for_user(Scope::Authentication, identity.user_id)
        .await
    {
        return errors::store_error(err);
    }

    (
        StatusCode::OK,
        Json(json!({ "message": "you have been logged out" })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

pub async fn create_activation_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EmailRequest>,
) -> Response {
    let user = match lookup_by_email(&state, &body.email).await {
        Ok(user) => user,
        Err(res) => return res,
    };

    if user.activated {
        return errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "already_activated",
            "user has already been activated",
        );
    }

    let now = state.clock.now();
    let token = Token::new(user.id, Scope::Activation, now);
    if let Err(err) = state.tokens.insert(&token).await {
        return errors::store_error(err);
    }

    let task = Task::new(
        TaskKind::TokenActivationMail(TokenActivationMail {
            email: user.email.clone(),
            activation_url: format!(
                "{}/v1/users/activated/{}",
                state.config.base_url, token.plaintext
            ),
        }),
        3,
        now,
    );
    submit_in_background(&state, task);

    accepted("an email will be sent to you containing activation instructions")
}

pub async fn create_password_reset_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EmailRequest>,
) -> Response {
    let user = match lookup_by_email(&state, &body.email).await {
        Ok(user) => user,
        Err(res) => return res,
    };

    if !user.activated {
        return errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "inactive_account",
            "user account must be activated",
        );
    }

    let now = state.clock.now();
    let token = Token::new(user.id, Scope::PasswordReset, now);
    if let Err(err) = state.tokens.insert(&token).await {
        return errors::store_error(err);
    }

    let task = Task::new(
        TaskKind::PasswordResetMail(PasswordResetMail {
            email: user.email.clone(),
            password_reset_url: format!(
                "{}/v1/users/password/{}",
                state.config.base_url, token.plaintext
            ),
        }),
        1,
        now,
    );
    submit_in_background(&state, task);

    accepted("an email will be sent to you containing password reset instructions")
}

async fn lookup_by_email(state: &AppState, email: &str) -> Result<UserRecord, Response> {
    let mut v = Validator::new();
    validate_email(&mut v, email);
    v.finish()?;

    match state.users.get_by_email(email).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unknown_email",
            "no matching email address found",
        )),
        Err(err) => Err(errors::store_error(err)),
    }
}

fn submit_in_background(state: &AppState, task: Task) {
    let scheduler = state.scheduler.clone();
    let kind = task.kind.name();
    tokio::spawn(async move {
        if let Err(err) = scheduler.submit(task).await {
            tracing::error!(error = %err, kind, "failed to submit mail task");
        }
    });
}

fn accepted(message: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": message })),
    )
        .into_response()
}
