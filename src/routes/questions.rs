use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::AppState;
use crate::handlers;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/questions", post(handlers::create_question))
        .route("/questions", get(handlers::list_questions))
        .route("/questions/paginated", get(handlers::paginated_questions))
        .route("/questions/{id}", get(handlers::get_question))
        .route("/questions/{id}", put(handlers::update_question))
        .route("/questions/{id}", delete(handlers::delete_question))
}
