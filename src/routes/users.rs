use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::AppState;
use crate::handlers;

pub fn routes() -> Router<AppState> {
    Router::new()
        // Registration and login are the two ungated write paths.
        .route("/users/auth", post(handlers::register))
        .route("/users/login", post(handlers::login))
        .route("/users", get(handlers::list_users))
        // The static segment wins over the id capture below.
        .route("/users/me", get(handlers::me))
        .route("/users/{id}", get(handlers::get_user))
        .route("/users/{id}", put(handlers::update_user))
        .route("/users/{id}", delete(handlers::delete_user))
}
