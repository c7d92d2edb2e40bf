use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};

use tally_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

/// Decode the bearer token, if any. A present but invalid token is an error
/// rather than an anonymous request.
pub fn bearer_claims(headers: &HeaderMap, secret: &str) -> Result<Option<Claims>, ApiError> {
    let Some(auth) = headers.typed_get::<Authorization<Bearer>>() else {
        return Ok(None);
    };

    let token_data = decode::<Claims>(
        auth.token(),
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::AuthenticationRequired("Invalid or expired token".to_string()))?;

    Ok(Some(token_data.claims))
}

/// Route layer for groups where every route needs a caller. Handlers read
/// the caller with `Extension<Claims>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(req.headers(), &state.jwt_secret)?
        .ok_or_else(ApiError::unauthenticated)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Extractor for handlers on paths that mix public reads and authenticated
/// writes.
pub struct AuthUser(pub Claims);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(claims) = parts.extensions.get::<Claims>() {
            return Ok(Self(claims.clone()));
        }
        bearer_claims(&parts.headers, &state.jwt_secret)?
            .map(Self)
            .ok_or_else(ApiError::unauthenticated)
    }
}
