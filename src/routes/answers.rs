use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::AppState;
use crate::handlers;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/answers/question/{id}", post(handlers::create_answer))
        .route("/answers", get(handlers::list_answers))
        .route("/answers/{id}", get(handlers::get_answer))
        .route("/answers/{id}", put(handlers::update_answer))
        .route("/answers/{id}", delete(handlers::delete_answer))
}
