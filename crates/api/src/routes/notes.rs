//! Notes: the authenticated write surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::Row;

use crate::context::Principal;
use crate::errors;
use crate::state::AppState;
use crate::validation::Validator;

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub passage: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
struct NoteResponse {
    id: i64,
    passage: String,
    body: String,
    created_at: DateTime<Utc>,
}

pub async fn create_note(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateNoteRequest>,
) -> Response {
    let Some(identity) = principal.identity() else {
        return errors::authentication_required();
    };

    let mut v = Validator::new();
    v.check(!body.passage.is_empty(), "passage", "must be provided");
    v.check(
        body.passage.len() <= 100,
        "passage",
        "must not be more than 100 bytes long",
    );
    v.check(!body.body.is_empty(), "body", "must be provided");
    v.check(
        body.body.len() <= 10_000,
        "body",
        "must not be more than 10000 bytes long",
    );
    if let Err(res) = v.finish() {
        return res;
    }

    let now = state.clock.now();
    let row = sqlx::query(
        r#"
        INSERT INTO notes (user_id, passage, body, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(identity.user_id.get())
    .bind(&body.passage)
    .bind(&body.body)
    .bind(now)
    .fetch_one(&state.db)
    .await;

    match row {
        Ok(row) => {
            let id: i64 = match row.try_get("id") {
                Ok(id) => id,
                Err(err) => {
                    tracing::error!(error = %err, "note insert returned no id");
                    return errors::server_error();
                }
            };
            (
                StatusCode::CREATED,
                Json(json!({
                    "note": NoteResponse {
                        id,
                        passage: body.passage,
                        body: body.body,
                        created_at: now,
                    }
                })),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "note insert failed");
            errors::server_error()
        }
    }
}

pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    let Some(identity) = principal.identity() else {
        return errors::authentication_required();
    };

    let rows = sqlx::query(
        r#"
        SELECT id, passage, body, created_at
        FROM notes
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT 50
        "#,
    )
    .bind(identity.user_id.get())
    .fetch_all(&state.db)
    .await;

    match rows {
        Ok(rows) => {
            let mut notes = Vec::with_capacity(rows.len());
            for row in rows {
                let note = (|| -> Result<NoteResponse, sqlx::Error> {
                    Ok(NoteResponse {
                        id: row.try_get("id")?,
                        passage: row.try_get("passage")?,
                        body: row.try_get("body")?,
                        created_at: row.try_get("created_at")?,
                    })
                })();
                match note {
                    Ok(note) => notes.push(note),
                    Err(err) => {
                        tracing::error!(error = %err, "malformed note row");
                        return errors::server_error();
                    }
                }
            }
            (StatusCode::OK, Json(json!({ "notes": notes }))).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "note listing failed");
            errors::server_error()
        }
    }
}

pub async fn delete_note(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Response {
    let Some(identity) = principal.identity() else {
        return errors::authentication_required();
    };

    let result = sqlx::query("DELETE FROM notes WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(identity.user_id.get())
        .execute(&state.db)
        .await;

    match result {
        Ok(result) if result.rows_affected() == 0 => errors::not_found(),
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "note deletion failed");
            errors::server_error()
        }
    }
}
