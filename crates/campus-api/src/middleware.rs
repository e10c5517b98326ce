use axum::{
    extract::{Query, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

use campus_types::api::Claims;

use crate::auth::AppState;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_token(&state.jwt_secret, token).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

/// Like `require_auth`, but also accepts `?token=` for WebSocket upgrades.
pub async fn require_auth_or_query(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let token = match header_token {
        Some(token) => token,
        None => {
            Query::<TokenQuery>::try_from_uri(req.uri())
                .map_err(|_| StatusCode::UNAUTHORIZED)?
                .0
                .token
        }
    };

    let claims = verify_token(&state.jwt_secret, &token).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::create_token;
    use uuid::Uuid;

    #[test]
    fn issued_tokens_verify_with_the_same_secret() {
        let user_id = Uuid::new_v4();
        let token = create_token("secret", user_id, "ada").unwrap();

        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "ada");

        assert!(verify_token("other-secret", &token).is_none());
        assert!(verify_token("secret", "not-a-token").is_none());
    }
}
