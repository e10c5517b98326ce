//! HTTP and WebSocket handlers over the chat layer.

pub mod auth;
pub mod live;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod users;

use std::path::Path;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware as axum_middleware,
    routing::{delete, get, post},
};
use tower_http::services::ServeDir;
use tracing::{error, warn};

use campus_chat::ChatError;
use campus_storage::MAX_OBJECT_SIZE;

use crate::auth::AppState;

/// Request body cap for message sends: two base64-encoded files plus the text.
const MESSAGE_BODY_LIMIT: usize = MAX_OBJECT_SIZE / 3 * 8 + 64 * 1024;

/// Build the full route table. Object files under `storage_root` are served
/// publicly at `/storage`.
pub fn router(state: AppState, storage_root: &Path) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/direct", post(rooms::direct_room))
        .route("/rooms/{room_id}/join", post(rooms::join_room))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages)
                .post(messages::send_message)
                .layer(DefaultBodyLimit::max(MESSAGE_BODY_LIMIT)),
        )
        .route("/rooms/{room_id}/read", post(messages::mark_read))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/users/search", get(users::search_users))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state.clone());

    // Browsers cannot set headers on a WebSocket upgrade, so the live route
    // also takes the token as a query parameter.
    let live_routes = Router::new()
        .route("/rooms/{room_id}/live", get(live::live_room))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth_or_query,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(live_routes)
        .nest_service("/storage", ServeDir::new(storage_root))
}

pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ChatError::Upload(_) => StatusCode::BAD_GATEWAY,
        e if e.is_access_denied() => StatusCode::FORBIDDEN,
        ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Log a chat failure at a level matching its cause and turn it into a status.
pub(crate) fn reject(err: ChatError) -> StatusCode {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("{:#}", err);
    } else {
        warn!("Rejected: {}", err);
    }
    status
}
