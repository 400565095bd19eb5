use crate::directory::DirectoryError;
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::{extract::State, Form, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// OAuth2 password-grant style login form; `username` carries the email
#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

/// POST /token
#[tracing::instrument(skip(state, form))]
pub async fn login(
    State(state): State<Arc<AppState>>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Json<TokenResponse>, DirectoryError> {
    let Form(form) = form.map_err(|e| DirectoryError::Validation(e.body_text()))?;
    let access_token = state.directory.login(&form.username, &form.password).await?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}
