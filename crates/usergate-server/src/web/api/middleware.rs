use crate::directory::{Actor, DirectoryError};
use crate::state::AppState;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use std::sync::Arc;

/// Extractor that resolves a Bearer token to the user it was issued for.
/// Rejects with 401 when the header is missing, malformed or the token does
/// not resolve to an existing user.
#[derive(Debug)]
pub struct AuthUser(pub Actor);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = DirectoryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(DirectoryError::Unauthenticated)?;

        let actor = state.directory.authenticate(token).await?;
        Ok(AuthUser(actor))
    }
}
