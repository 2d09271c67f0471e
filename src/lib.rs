use std::sync::Arc;

use axum::{Router, extract::FromRef, http::HeaderName, middleware, routing::get};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod store;
pub mod token;

pub mod routes;

// --- Public Re-exports ---

pub use cache::{CacheState, MemoryCache, RedisCache};
pub use config::{AppConfig, Env};
pub use coordinator::{CacheConsistencyCoordinator, IoLimiter};
pub use error::{ApiError, ErrorBody, StoreError};
pub use gate::{GateMode, gate_middleware, mode_for};
pub use policy::{AccessRule, Identity, Role, authorize};
pub use store::{AggregateStore, MemoryStore, PostgresStore, StoreState};
pub use token::{AuthError, Claims, TokenCodec, bearer_token};

/// ApiDoc
///
/// Aggregates every annotated handler and schema into the OpenAPI document
/// served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::register, handlers::login, handlers::get_user, handlers::list_users,
        handlers::me, handlers::update_user, handlers::delete_user,
        handlers::create_question, handlers::get_question, handlers::list_questions,
        handlers::paginated_questions, handlers::update_question, handlers::delete_question,
        handlers::create_answer, handlers::get_answer, handlers::list_answers,
        handlers::update_answer, handlers::delete_answer,
        handlers::create_question_comment, handlers::create_answer_comment,
        handlers::get_comment, handlers::list_comments, handlers::update_comment,
        handlers::delete_comment,
    ),
    components(
        schemas(
            models::UserView, models::QuestionView, models::AnswerView, models::CommentView,
            models::RegisterRequest, models::LoginRequest, models::TokenResponse,
            models::CreateQuestionRequest, models::UpdateQuestionRequest,
            models::CreateAnswerRequest, models::UpdateAnswerRequest,
            models::CreateCommentRequest, models::UpdateCommentRequest,
            models::UpdateUserRequest, models::PaginatedQuestions,
            policy::Role, error::ErrorBody,
        )
    ),
    tags(
        (name = "qna-portal", description = "Community Q&A API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single immutable container holding every shared service. Cloned per
/// request; all members are cheap handles.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative persistence behind the `AggregateStore` trait.
    pub store: StoreState,
    /// Look-aside cache tier; never authoritative.
    pub cache: CacheState,
    /// Read-through / write-fan-out orchestration over store + cache.
    pub coordinator: Arc<CacheConsistencyCoordinator>,
    /// Token signing and validation.
    pub codec: TokenCodec,
    /// Loaded, immutable environment configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Wires the state from its parts, constructing the coordinator over the
    /// same store and cache handles the handlers see.
    pub fn new(store: StoreState, cache: CacheState, codec: TokenCodec, config: AppConfig) -> Self {
        let coordinator = Arc::new(CacheConsistencyCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            IoLimiter::default(),
            config.cache_ttl,
        ));
        Self {
            store,
            cache,
            coordinator,
            codec,
            config,
        }
    }
}

// Selective extraction of individual services from the shared state.

impl FromRef<AppState> for StoreState {
    fn from_ref(app_state: &AppState) -> StoreState {
        Arc::clone(&app_state.store)
    }
}

impl FromRef<AppState> for CacheState {
    fn from_ref(app_state: &AppState) -> CacheState {
        Arc::clone(&app_state.cache)
    }
}

impl FromRef<AppState> for TokenCodec {
    fn from_ref(app_state: &AppState) -> TokenCodec {
        app_state.codec.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the full routing structure. The gate middleware wraps every
/// route, including the exempt ones: exemption is a decision the gate makes,
/// not a hole in its coverage.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health))
        .merge(routes::users::routes())
        .merge(routes::questions::routes())
        .merge(routes::answers::routes())
        .merge(routes::comments::routes())
        // One gate over everything; handlers read the resolved identity
        // from request extensions and never touch the Authorization header.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gate_middleware,
        ))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// Builds the per-request tracing span, correlating every log line through
/// the generated `x-request-id` header.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
