use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use campus_types::api::{Claims, SearchQuery};

use crate::auth::AppState;
use crate::reject;

/// Profiles matching `q` by username or display name, excluding the caller.
pub async fn search_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let profiles = state.client(&claims).search_users(&query.q).await.map_err(reject)?;
    Ok(Json(profiles))
}
