use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::policy::Role;

// --- Flat entity records (authoritative rows) ---
//
// Entities are deliberately flat: children reference parents by id only.
// The nested shapes the API exposes are assembled by the pure view
// constructors below, never by traversing live object references.

/// User
///
/// Canonical identity record. The password hash never leaves the store layer
/// in any serialized form; `UserView` is the outward shape.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Question
///
/// Root aggregate. Answers and comments attach to it by foreign key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Question {
    pub id: i64,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Answer
///
/// Belongs to exactly one question; comments may attach to it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub user_id: Uuid,
    pub body: String,
    pub rating: i32,
    pub is_best: bool,
    pub created_at: DateTime<Utc>,
}

/// Comment
///
/// Attaches to exactly one parent: either a question or an answer, never
/// both. The invariant is enforced at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Comment {
    pub id: i64,
    pub user_id: Uuid,
    pub question_id: Option<i64>,
    pub answer_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// --- Denormalized views (cacheable projections) ---

/// UserView
///
/// The outward user shape. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

/// CommentView
///
/// A comment with its author resolved. Carries the parent ids so clients can
/// navigate without the server nesting comments inside each other.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CommentView {
    pub id: i64,
    pub content: String,
    pub user: UserView,
    pub question_id: Option<i64>,
    pub answer_id: Option<i64>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// AnswerView
///
/// An answer with its author and its comments embedded.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AnswerView {
    pub id: i64,
    pub question_id: i64,
    pub body: String,
    pub rating: i32,
    pub is_best: bool,
    pub user: UserView,
    pub comments: Vec<CommentView>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// QuestionView
///
/// The full denormalized question aggregate: the question, its answers (each
/// with their comments), and the comments attached directly to the question.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct QuestionView {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub user: UserView,
    pub answers: Vec<AnswerView>,
    pub comments: Vec<CommentView>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Resolves a user id against the preloaded author map. A dangling id (author
/// deleted after the fact) degrades to a placeholder instead of failing the
/// whole projection.
fn resolve_user(users: &HashMap<Uuid, User>, id: Uuid) -> UserView {
    users.get(&id).map(UserView::from).unwrap_or(UserView {
        id,
        username: "deleted user".to_string(),
        role: Role::User,
    })
}

/// Builds a `CommentView` from a flat record plus the author map.
pub fn assemble_comment_view(comment: &Comment, users: &HashMap<Uuid, User>) -> CommentView {
    CommentView {
        id: comment.id,
        content: comment.content.clone(),
        user: resolve_user(users, comment.user_id),
        question_id: comment.question_id,
        answer_id: comment.answer_id,
        created_at: comment.created_at,
    }
}

/// Builds an `AnswerView` from a flat record, the comments attached to it,
/// and the author map. Pure function of its inputs.
pub fn assemble_answer_view(
    answer: &Answer,
    comments: &[Comment],
    users: &HashMap<Uuid, User>,
) -> AnswerView {
    AnswerView {
        id: answer.id,
        question_id: answer.question_id,
        body: answer.body.clone(),
        rating: answer.rating,
        is_best: answer.is_best,
        user: resolve_user(users, answer.user_id),
        comments: comments
            .iter()
            .filter(|c| c.answer_id == Some(answer.id))
            .map(|c| assemble_comment_view(c, users))
            .collect(),
        created_at: answer.created_at,
    }
}

/// Builds the full `QuestionView` aggregate from flat records. `comments`
/// holds every comment in the question's subtree; they are partitioned here
/// between the question itself and its answers by parent id.
pub fn assemble_question_view(
    question: &Question,
    answers: &[Answer],
    comments: &[Comment],
    users: &HashMap<Uuid, User>,
) -> QuestionView {
    QuestionView {
        id: question.id,
        title: question.title.clone(),
        body: question.body.clone(),
        user: resolve_user(users, question.user_id),
        answers: answers
            .iter()
            .map(|a| assemble_answer_view(a, comments, users))
            .collect(),
        comments: comments
            .iter()
            .filter(|c| c.question_id == Some(question.id))
            .map(|c| assemble_comment_view(c, users))
            .collect(),
        created_at: question.created_at,
    }
}

/// CommentParent
///
/// The single parent a comment attaches to. Constructing a comment through
/// this type is what guarantees exactly one parent reference is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentParent {
    Question(i64),
    Answer(i64),
}

impl CommentParent {
    pub fn question_id(self) -> Option<i64> {
        match self {
            CommentParent::Question(id) => Some(id),
            CommentParent::Answer(_) => None,
        }
    }

    pub fn answer_id(self) -> Option<i64> {
        match self {
            CommentParent::Question(_) => None,
            CommentParent::Answer(id) => Some(id),
        }
    }
}

// --- Request payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Issued on successful login; the only place a token is ever minted.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateQuestionRequest {
    pub title: String,
    pub body: String,
}

/// Partial update: only provided fields change.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateQuestionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateAnswerRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateAnswerRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_best: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateCommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

// --- Pagination ---

/// PaginatedQuestions
///
/// Page envelope for the listing endpoint. The arithmetic is plain: the page
/// index is clamped into range and the slice bounds derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PaginatedQuestions {
    pub current_page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub has_next: bool,
    pub has_prev: bool,
    pub questions: Vec<QuestionView>,
}

impl PaginatedQuestions {
    /// Slices `all` into the requested page. `page_size` must be non-zero;
    /// the handler validates that before calling.
    pub fn new(all: Vec<QuestionView>, page: usize, page_size: usize) -> Self {
        let total_items = all.len();
        let total_pages = total_items.div_ceil(page_size);
        let current_page = page.min(total_pages.saturating_sub(1));

        let from = current_page * page_size;
        let to = (from + page_size).min(total_items);
        let questions = if from < total_items {
            all[from..to].to_vec()
        } else {
            Vec::new()
        };

        Self {
            current_page,
            page_size,
            total_pages,
            total_items,
            has_next: current_page + 1 < total_pages,
            has_prev: current_page > 0,
            questions,
        }
    }
}
