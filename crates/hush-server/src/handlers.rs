use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{service::ServiceError, AppState};

/// Plaintext size cap for `/encrypt` bodies.
const MAX_MESSAGE_BYTES: usize = 1_048_576;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Key generation ───────────────────────────────────────────────────────────

pub async fn generate_key(State(state): State<AppState>) -> Response {
    let key = state.service.generate_key();
    Json(json!({ "key": key })).into_response()
}

// ── Encrypt ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EncryptRequest {
    // Absent fields deserialize to empty strings so validation happens in
    // one place, with the contract's error body instead of a 422.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub key: String,
    pub expiry_hours: Option<u32>,
    pub max_views: Option<u32>,
}

pub async fn encrypt_message(
    State(state): State<AppState>,
    body: Result<Json<EncryptRequest>, JsonRejection>,
) -> Response {
    // Broken JSON and wrong-typed fields reject before the handler runs;
    // fold them into the {"error": ...} contract instead of axum's 422.
    let Json(body) = match body {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(ServiceError::MalformedInput(rejection.body_text()))
        }
    };

    if body.message.len() > MAX_MESSAGE_BYTES {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message exceeds 1 MiB limit"})),
        )
            .into_response();
    }

    match state
        .service
        .create_message(&body.message, &body.key, body.expiry_hours, body.max_views)
    {
        Ok(created) => Json(json!({
            "message_id": created.id,
            "encrypted_message": created.ciphertext,
            "expires_in": format!("{} hours", created.expiry_hours),
            "max_views": created.max_views,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ── Fetch ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub message_id: String,
    pub encrypted_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views_left: Option<u32>,
    /// Whole seconds until expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Response {
    match state.service.fetch_message(&message_id) {
        Ok(fetched) => Json(FetchResponse {
            message_id,
            encrypted_message: fetched.ciphertext,
            views_left: fetched.views_left,
            expires_in: fetched.expires_in,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ── Decrypt ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DecryptRequest {
    pub encrypted_message: Option<String>,
    pub message_id: Option<String>,
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct DecryptResponse {
    pub decrypted_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views_left: Option<u32>,
}

pub async fn decrypt_message(
    State(state): State<AppState>,
    body: Result<Json<DecryptRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(ServiceError::MalformedInput(rejection.body_text()))
        }
    };

    match state.service.decrypt_message(
        body.message_id.as_deref(),
        body.encrypted_message.as_deref(),
        &body.key,
    ) {
        Ok(out) => Json(DecryptResponse {
            decrypted_message: out.plaintext,
            views_left: out.views_left,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ── Cleanup ──────────────────────────────────────────────────────────────────

pub async fn cleanup(State(state): State<AppState>) -> Response {
    match state.service.cleanup() {
        Ok(deleted) => {
            info!(deleted, "manual cleanup");
            Json(json!({"success": true, "deleted_count": deleted})).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn error_response(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::Validation(_)
        | ServiceError::MalformedInput(_)
        | ServiceError::Authentication => StatusCode::BAD_REQUEST,
        ServiceError::NotFound => StatusCode::NOT_FOUND,
        ServiceError::Expired | ServiceError::Exhausted => StatusCode::GONE,
        ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = match &err {
        ServiceError::Internal(e) => {
            tracing::error!(error = %e, "internal error");
            json!({"error": "internal server error"})
        }
        other => json!({"error": other.to_string()}),
    };
    (status, Json(body)).into_response()
}
