use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::info;
use uuid::Uuid;

use tally_types::api::{
    ChangePasswordRequest, Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
    TokenResponse,
};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    req.validate()?;

    // Check if username is taken
    let db = state.db.clone();
    let username = req.username.clone();
    let taken = blocking(move || Ok(db.get_user_by_username(&username)?.is_some())).await?;
    if taken {
        return Err(ApiError::ConstraintViolation(format!(
            "username '{}' is already taken",
            req.username
        )));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();

    let db = state.db.clone();
    let username = req.username.clone();
    blocking(move || Ok(db.create_user(&user_id.to_string(), &username, &password_hash)?)).await?;

    let token = create_token(&state, user_id, &req.username)?;
    info!("Registered user {} ({})", req.username, user_id);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let bad_credentials = || ApiError::AuthenticationRequired("Invalid username or password".to_string());

    let db = state.db.clone();
    let username = req.username.clone();
    let user = blocking(move || Ok(db.get_user_by_username(&username)?))
        .await?
        .ok_or_else(bad_credentials)?;

    verify_password(&req.password, &user.password).map_err(|_| bad_credentials())?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(format!("corrupt user id '{}': {}", user.id, e)))?;
    let token = create_token(&state, user_id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// Issue a fresh token for an already authenticated caller.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let token = create_token(&state, claims.sub, &claims.username)?;
    Ok(Json(TokenResponse { token }))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    req.validate()?;

    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let user = blocking(move || Ok(db.get_user_by_id(&user_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;

    verify_password(&req.old_password, &user.password).map_err(|_| {
        ApiError::AuthenticationRequired("Old password is incorrect".to_string())
    })?;

    let password_hash = hash_password(&req.new_password)?;
    let db = state.db.clone();
    let user_id = user.id.clone();
    let updated = blocking(move || Ok(db.update_password(&user_id, &password_hash)?)).await?;
    if !updated {
        return Err(ApiError::not_found("user"));
    }

    info!("User {} changed their password", claims.username);
    Ok(StatusCode::NO_CONTENT)
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    // Argon2id with a random salt
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, stored: &str) -> Result<(), ApiError> {
    let parsed_hash = PasswordHash::new(stored)
        .map_err(|e| ApiError::Internal(format!("stored password hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthenticated())
}

pub fn create_token(state: &AppState, user_id: Uuid, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + state.token_ttl).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))
}
