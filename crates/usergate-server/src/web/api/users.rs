use crate::directory::DirectoryError;
use crate::state::AppState;
use crate::web::api::middleware::AuthUser;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use usergate_common::models::auth::{DeleteConfirmation, UserDraft, UserPatch, UserView};

fn user_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, DirectoryError> {
    path.map(|Path(id)| id)
        .map_err(|e| DirectoryError::Validation(e.body_text()))
}

fn payload<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, DirectoryError> {
    body.map(|Json(v)| v)
        .map_err(|e| DirectoryError::Validation(e.body_text()))
}

/// GET /users/me
#[tracing::instrument(skip(state, auth))]
pub async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UserView>, DirectoryError> {
    Ok(Json(state.directory.get_self(&auth.0)?))
}

/// GET /users
#[tracing::instrument(skip(state, auth))]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<UserView>>, DirectoryError> {
    Ok(Json(state.directory.list_all(&auth.0).await?))
}

/// GET /users/{id}
#[tracing::instrument(skip(state, auth))]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<UserView>, DirectoryError> {
    let id = user_id(id)?;
    Ok(Json(state.directory.get_by_id(&auth.0, id).await?))
}

/// POST /users
#[tracing::instrument(skip(state, auth, body))]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    body: Result<Json<UserDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<UserView>), DirectoryError> {
    let draft = payload(body)?;
    let created = state.directory.create(&auth.0, draft).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /users/{id}
#[tracing::instrument(skip(state, auth, body))]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UserPatch>, JsonRejection>,
) -> Result<Json<UserView>, DirectoryError> {
    let id = user_id(id)?;
    let patch = payload(body)?;
    Ok(Json(state.directory.update(&auth.0, id, patch).await?))
}

/// DELETE /users/{id}
#[tracing::instrument(skip(state, auth))]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<DeleteConfirmation>, DirectoryError> {
    let id = user_id(id)?;
    Ok(Json(state.directory.delete(&auth.0, id).await?))
}
