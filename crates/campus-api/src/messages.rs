use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use campus_chat::{SendMessage, UploadFile};
use campus_storage::MAX_OBJECT_SIZE;
use campus_types::api::{Claims, FilePayload, SendMessageRequest};

use crate::auth::AppState;
use crate::reject;

/// Room history, oldest first. Opening a room counts as reading it.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let client = state.client(&claims);
    let messages = client.fetch_messages(room_id).await.map_err(reject)?;

    if let Err(e) = client.mark_room_read(room_id).await {
        warn!("Failed to mark room {} read for {}: {}", room_id, claims.username, e);
    }

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let image_file = req.image.map(decode_file).transpose()?;
    let document_file = req.document.map(decode_file).transpose()?;

    let message = state
        .client(&claims)
        .send_message(SendMessage {
            room_id,
            content: req.content,
            image_file,
            document_file,
            reply_to: req.reply_to,
        })
        .await
        .map_err(reject)?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let updated = state.client(&claims).mark_room_read(room_id).await.map_err(reject)?;
    Ok(Json(json!({ "updated": updated })))
}

/// Only the sender may delete a message.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, StatusCode> {
    let deleted = state
        .client(&claims)
        .delete_message(message_id)
        .await
        .map_err(reject)?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

fn decode_file(payload: FilePayload) -> Result<UploadFile, StatusCode> {
    let data = B64.decode(&payload.data).map_err(|_| StatusCode::BAD_REQUEST)?;
    if data.len() > MAX_OBJECT_SIZE {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    Ok(UploadFile {
        name: payload.name,
        content_type: payload.content_type,
        data: Bytes::from(data),
    })
}
