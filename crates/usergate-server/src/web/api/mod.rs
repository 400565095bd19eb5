pub mod auth;
pub mod error;
pub mod middleware;
pub mod users;

use crate::state::AppState;
use axum::response::IntoResponse;
use axum::{routing::get, routing::post, Json, Router};
use serde_json::json;
use std::sync::Arc;

pub const API_VERSION: &str = "v1";

/// GET /version -- public endpoint reporting the API version
async fn get_version() -> impl IntoResponse {
    Json(json!({ "api_version": API_VERSION }))
}

pub fn build_api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/version", get(get_version))
        .route("/token", post(auth::login))
        .route("/users/me", get(users::me))
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/{id}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .with_state(state)
}
