use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::{error, info};
use uuid::Uuid;

use campus_chat::{Backend, ChatClient, ChatError, Session};
use campus_db::{UsernameTaken, now_timestamp};
use campus_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub backend: Arc<Backend>,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Chat client acting as the token's user.
    pub fn client(&self, claims: &Claims) -> ChatClient {
        ChatClient::new(
            self.backend.clone(),
            Session::authenticated(claims.sub, claims.username.clone()),
        )
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if !req.username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(StatusCode::BAD_REQUEST);
    }
    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() || display_name.chars().count() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Check if username is taken
    let username = req.username.clone();
    let taken = state
        .backend
        .run_db(move |db| db.get_profile_by_username(&username))
        .await
        .map_err(|e| {
            error!("Username lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .is_some();
    if taken {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    let user_id = Uuid::new_v4();

    let (id, username) = (user_id.to_string(), req.username.clone());
    state
        .backend
        .run_db(move |db| {
            db.create_profile(&id, &username, &display_name, &password_hash, &now_timestamp())
        })
        .await
        .map_err(|e| insert_failure_status(&e))?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("Registered {} ({})", req.username, user_id);
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let username = req.username.clone();
    let profile = state
        .backend
        .run_db(move |db| db.get_profile_by_username(&username))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&profile.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = profile.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, user_id, &profile.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id,
        username: profile.username,
        token,
    }))
}

/// A concurrent registration can claim the username between the lookup and
/// the insert; that loses with 409 like the lookup would have.
fn insert_failure_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::Store(e) if e.is::<UsernameTaken>() => StatusCode::CONFLICT,
        e => {
            error!("Profile insert failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
