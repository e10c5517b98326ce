use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use campus_types::api::{Claims, CreateRoomRequest, DirectRoomRequest};

use crate::auth::AppState;
use crate::reject;

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rooms = state.client(&claims).list_user_rooms().await.map_err(reject)?;
    Ok(Json(rooms))
}

pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let room = state
        .client(&claims)
        .create_group_room(&req.name, req.description.as_deref(), req.is_private)
        .await
        .map_err(reject)?;

    Ok((StatusCode::CREATED, Json(room)))
}

/// Find or create the direct-message room with another user.
pub async fn direct_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DirectRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let room = state
        .client(&claims)
        .find_or_create_direct_message(req.other_user_id)
        .await
        .map_err(reject)?;

    Ok(Json(room))
}

pub async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let joined = state.client(&claims).join_room(room_id).await.map_err(reject)?;
    Ok(Json(json!({ "joined": joined })))
}
