use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use crate::models::{
    AnswerView, CommentParent, CommentView, CreateAnswerRequest, CreateCommentRequest,
    CreateQuestionRequest, LoginRequest, PaginatedQuestions, QuestionView, RegisterRequest,
    TokenResponse, UpdateAnswerRequest, UpdateCommentRequest, UpdateQuestionRequest,
    UpdateUserRequest, UserView,
};
use crate::policy::{AccessRule, Identity, Role, authorize};
use crate::store::AggregateStore as _;

// --- Password hashing ---

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

// --- Health ---

#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")))]
pub async fn health() -> &'static str {
    "OK"
}

// --- Users ---

/// register
///
/// Creates a new account with the base role. The username is the uniqueness
/// anchor; a taken name is a 409, not a validation error.
#[utoipa::path(
    post,
    path = "/users/auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserView),
        (status = 409, description = "Username already taken")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "username and password must not be empty".to_string(),
        ));
    }
    if state
        .store
        .get_user_by_username(&payload.username)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "username '{}' is already taken",
            payload.username
        )));
    }

    let hash = hash_password(&payload.password)?;
    let user = state
        .store
        .create_user(payload.username, hash, Role::User)
        .await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))))
}

/// login
///
/// The only place a token is minted. A wrong username and a wrong password
/// produce the same response.
#[utoipa::path(
    post,
    path = "/users/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .store
        .get_user_by_username(&payload.username)
        .await?
        .filter(|u| verify_password(&payload.password, &u.password_hash))
        .ok_or_else(|| ApiError::Authentication("invalid username or password".to_string()))?;

    let token = state
        .codec
        .issue(user.id)
        .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))?;
    Ok(Json(TokenResponse { token }))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    responses((status = 200, description = "User", body = UserView), (status = 404, description = "Not Found"))
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserView>, ApiError> {
    Ok(Json(state.coordinator.load_user(id).await?))
}

#[utoipa::path(
    get,
    path = "/users",
    responses((status = 200, description = "All users", body = [UserView]))
)]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserView>>, ApiError> {
    let users = state.store.list_users().await?;
    Ok(Json(users.iter().map(UserView::from).collect()))
}

/// me
///
/// The caller's own profile. The route is outside the exemption table, so
/// the gate guarantees a `Known` identity here.
#[utoipa::path(
    get,
    path = "/users/me",
    responses((status = 200, description = "Own profile", body = UserView), (status = 401, description = "Not authenticated"))
)]
pub async fn me(
    identity: Identity,
    State(state): State<AppState>,
) -> Result<Json<UserView>, ApiError> {
    let id = identity
        .id()
        .ok_or_else(|| ApiError::Authentication("authentication required".to_string()))?;
    Ok(Json(state.coordinator.load_user(id).await?))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserView),
        (status = 403, description = "Not owner or admin"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_user(
    identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserView>, ApiError> {
    // The account itself is the owned resource here.
    authorize(&identity, AccessRule::RequireOwnerOrRole(Role::Admin), Some(id))?;

    let hash = match payload.password.as_deref() {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };
    let view = state
        .coordinator
        .update_user(id, payload.username, hash)
        .await?;
    Ok(Json(view))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    responses((status = 204, description = "Deleted"), (status = 403, description = "Admin only"), (status = 404, description = "Not Found"))
)]
pub async fn delete_user(
    identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::Admin), None)?;
    state.coordinator.delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Questions ---

#[utoipa::path(
    post,
    path = "/questions",
    request_body = CreateQuestionRequest,
    responses((status = 201, description = "Question created", body = QuestionView), (status = 401, description = "Not authenticated"))
)]
pub async fn create_question(
    identity: Identity,
    State(state): State<AppState>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<(StatusCode, Json<QuestionView>), ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::User), None)?;
    let user_id = identity
        .id()
        .ok_or_else(|| ApiError::Authentication("authentication required".to_string()))?;
    if payload.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".to_string()));
    }

    let view = state
        .coordinator
        .create_question(user_id, payload.title, payload.body)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[utoipa::path(
    get,
    path = "/questions/{id}",
    responses((status = 200, description = "Question aggregate", body = QuestionView), (status = 404, description = "Not Found"))
)]
pub async fn get_question(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<QuestionView>, ApiError> {
    Ok(Json(state.coordinator.load_question(id).await?))
}

#[utoipa::path(
    get,
    path = "/questions",
    responses((status = 200, description = "All questions", body = [QuestionView]))
)]
pub async fn list_questions(
    State(state): State<AppState>,
) -> Result<Json<Vec<QuestionView>>, ApiError> {
    Ok(Json(question_views(&state).await?))
}

/// Query parameters for the paginated listing.
#[derive(Debug, Deserialize, IntoParams)]
pub struct PageParams {
    /// Zero-based page index; clamped into range.
    pub page: Option<usize>,
    /// Page size; must be positive.
    pub size: Option<usize>,
    /// Restrict to the caller's own questions. Ignored for anonymous callers.
    pub mine: Option<bool>,
}

/// paginated_questions
///
/// The one optional-mode route: anonymous callers get the full public page,
/// authenticated callers may additionally filter to their own questions.
#[utoipa::path(
    get,
    path = "/questions/paginated",
    params(PageParams),
    responses((status = 200, description = "Page of questions", body = PaginatedQuestions), (status = 400, description = "Invalid page size"))
)]
pub async fn paginated_questions(
    identity: Identity,
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<PaginatedQuestions>, ApiError> {
    let page = params.page.unwrap_or(0);
    let size = params.size.unwrap_or(10);
    if size == 0 {
        return Err(ApiError::Validation(
            "page size must be positive".to_string(),
        ));
    }

    let mut views = question_views(&state).await?;
    if params.mine.unwrap_or(false) {
        if let Some(caller) = identity.id() {
            views.retain(|v| v.user.id == caller);
        }
    }
    Ok(Json(PaginatedQuestions::new(views, page, size)))
}

#[utoipa::path(
    put,
    path = "/questions/{id}",
    request_body = UpdateQuestionRequest,
    responses((status = 200, description = "Updated", body = QuestionView), (status = 403, description = "Admin only"), (status = 404, description = "Not Found"))
)]
pub async fn update_question(
    identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuestionRequest>,
) -> Result<Json<QuestionView>, ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::Admin), None)?;
    Ok(Json(state.coordinator.update_question(id, payload).await?))
}

#[utoipa::path(
    delete,
    path = "/questions/{id}",
    responses((status = 204, description = "Deleted"), (status = 403, description = "Admin only"), (status = 404, description = "Not Found"))
)]
pub async fn delete_question(
    identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::Admin), None)?;
    state.coordinator.delete_question(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Assembles the view for every question through the read-through path, so
/// listings share cache entries with single-question reads. A question
/// deleted mid-listing is skipped rather than failing the whole page.
async fn question_views(state: &AppState) -> Result<Vec<QuestionView>, ApiError> {
    let questions = state.store.list_questions().await?;
    let mut views = Vec::with_capacity(questions.len());
    for question in questions {
        match state.coordinator.load_question(question.id).await {
            Ok(view) => views.push(view),
            Err(ApiError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(views)
}

// --- Answers ---

#[utoipa::path(
    post,
    path = "/answers/question/{id}",
    request_body = CreateAnswerRequest,
    responses(
        (status = 201, description = "Answer created", body = AnswerView),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Question not found")
    )
)]
pub async fn create_answer(
    identity: Identity,
    State(state): State<AppState>,
    Path(question_id): Path<i64>,
    Json(payload): Json<CreateAnswerRequest>,
) -> Result<(StatusCode, Json<AnswerView>), ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::User), None)?;
    let user_id = identity
        .id()
        .ok_or_else(|| ApiError::Authentication("authentication required".to_string()))?;

    let question = state.coordinator.question_record(question_id).await?;
    let view = state
        .coordinator
        .create_answer(&question, user_id, payload.body)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[utoipa::path(
    get,
    path = "/answers/{id}",
    responses((status = 200, description = "Answer", body = AnswerView), (status = 404, description = "Not Found"))
)]
pub async fn get_answer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AnswerView>, ApiError> {
    Ok(Json(state.coordinator.load_answer(id).await?))
}

#[utoipa::path(
    get,
    path = "/answers",
    responses((status = 200, description = "All answers", body = [AnswerView]))
)]
pub async fn list_answers(
    State(state): State<AppState>,
) -> Result<Json<Vec<AnswerView>>, ApiError> {
    let answers = state.store.list_answers().await?;
    let mut views = Vec::with_capacity(answers.len());
    for answer in answers {
        match state.coordinator.load_answer(answer.id).await {
            Ok(view) => views.push(view),
            Err(ApiError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Json(views))
}

/// update_answer
///
/// Requires ownership *and* the admin role together. Ordinary users cannot
/// edit their own answers; admins cannot edit answers they do not own.
#[utoipa::path(
    put,
    path = "/answers/{id}",
    request_body = UpdateAnswerRequest,
    responses(
        (status = 200, description = "Updated", body = AnswerView),
        (status = 403, description = "Caller must own the answer and hold the admin role"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_answer(
    identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateAnswerRequest>,
) -> Result<Json<AnswerView>, ApiError> {
    let answer = state.coordinator.answer_record(id).await?;
    authorize(
        &identity,
        AccessRule::RequireOwnerAndRole(Role::Admin),
        Some(answer.user_id),
    )?;
    Ok(Json(state.coordinator.update_answer(&answer, payload).await?))
}

#[utoipa::path(
    delete,
    path = "/answers/{id}",
    responses((status = 204, description = "Deleted"), (status = 403, description = "Admin only"), (status = 404, description = "Not Found"))
)]
pub async fn delete_answer(
    identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::Admin), None)?;
    let answer = state.coordinator.answer_record(id).await?;
    state.coordinator.delete_answer(&answer).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Comments ---

fn validated_content(content: String) -> Result<String, ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::Validation(
            "comment content must not be empty".to_string(),
        ));
    }
    Ok(content)
}

#[utoipa::path(
    post,
    path = "/comments/question/{id}",
    request_body = CreateCommentRequest,
    responses(
        (status = 201, description = "Comment created", body = CommentView),
        (status = 400, description = "Empty content"),
        (status = 404, description = "Question not found")
    )
)]
pub async fn create_question_comment(
    identity: Identity,
    State(state): State<AppState>,
    Path(question_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentView>), ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::User), None)?;
    let user_id = identity
        .id()
        .ok_or_else(|| ApiError::Authentication("authentication required".to_string()))?;
    let content = validated_content(payload.content)?;

    let question = state.coordinator.question_record(question_id).await?;
    let view = state
        .coordinator
        .create_comment(
            user_id,
            CommentParent::Question(question.id),
            question.id,
            content,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[utoipa::path(
    post,
    path = "/comments/answer/{id}",
    request_body = CreateCommentRequest,
    responses(
        (status = 201, description = "Comment created", body = CommentView),
        (status = 400, description = "Empty content"),
        (status = 404, description = "Answer not found")
    )
)]
pub async fn create_answer_comment(
    identity: Identity,
    State(state): State<AppState>,
    Path(answer_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentView>), ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::User), None)?;
    let user_id = identity
        .id()
        .ok_or_else(|| ApiError::Authentication("authentication required".to_string()))?;
    let content = validated_content(payload.content)?;

    let answer = state.coordinator.answer_record(answer_id).await?;
    let view = state
        .coordinator
        .create_comment(
            user_id,
            CommentParent::Answer(answer.id),
            answer.question_id,
            content,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[utoipa::path(
    get,
    path = "/comments/{id}",
    responses((status = 200, description = "Comment", body = CommentView), (status = 404, description = "Not Found"))
)]
pub async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CommentView>, ApiError> {
    Ok(Json(state.coordinator.load_comment(id).await?))
}

#[utoipa::path(
    get,
    path = "/comments",
    responses((status = 200, description = "All comments", body = [CommentView]))
)]
pub async fn list_comments(
    State(state): State<AppState>,
) -> Result<Json<Vec<CommentView>>, ApiError> {
    let comments = state.store.list_comments().await?;
    let mut views = Vec::with_capacity(comments.len());
    for comment in comments {
        match state.coordinator.load_comment(comment.id).await {
            Ok(view) => views.push(view),
            Err(ApiError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Json(views))
}

#[utoipa::path(
    put,
    path = "/comments/{id}",
    request_body = UpdateCommentRequest,
    responses(
        (status = 200, description = "Updated", body = CommentView),
        (status = 400, description = "Empty content"),
        (status = 403, description = "Not owner or admin"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_comment(
    identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCommentRequest>,
) -> Result<Json<CommentView>, ApiError> {
    let comment = state.coordinator.comment_record(id).await?;
    authorize(
        &identity,
        AccessRule::RequireOwnerOrRole(Role::Admin),
        Some(comment.user_id),
    )?;
    let content = validated_content(payload.content)?;
    Ok(Json(state.coordinator.update_comment(&comment, content).await?))
}

#[utoipa::path(
    delete,
    path = "/comments/{id}",
    responses((status = 204, description = "Deleted"), (status = 403, description = "Admin only"), (status = 404, description = "Not Found"))
)]
pub async fn delete_comment(
    identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    authorize(&identity, AccessRule::RequireRole(Role::Admin), None)?;
    let comment = state.coordinator.comment_record(id).await?;
    state.coordinator.delete_comment(&comment).await?;
    Ok(StatusCode::NO_CONTENT)
}
