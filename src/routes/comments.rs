use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::AppState;
use crate::handlers;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/comments/question/{id}",
            post(handlers::create_question_comment),
        )
        .route(
            "/comments/answer/{id}",
            post(handlers::create_answer_comment),
        )
        .route("/comments", get(handlers::list_comments))
        .route("/comments/{id}", get(handlers::get_comment))
        .route("/comments/{id}", put(handlers::update_comment))
        .route("/comments/{id}", delete(handlers::delete_comment))
}
