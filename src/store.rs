use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Answer, Comment, CommentParent, Question, UpdateAnswerRequest, UpdateQuestionRequest, User,
};
use crate::policy::Role;

/// AggregateStore
///
/// The abstract contract for the authoritative backend. Handlers and the
/// cache-consistency coordinator only ever talk to this trait, so the
/// Postgres implementation can be swapped for the in-memory arena in tests.
///
/// Every mutation here is authoritative: if a method returns `Ok`, the row
/// exists (or is gone) regardless of what the cache later does.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    // --- Users ---
    async fn create_user(
        &self,
        username: String,
        password_hash: String,
        role: Role,
    ) -> Result<User, StoreError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    async fn update_user(
        &self,
        id: Uuid,
        username: Option<String>,
        password_hash: Option<String>,
    ) -> Result<Option<User>, StoreError>;
    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError>;

    // --- Questions ---
    async fn create_question(
        &self,
        user_id: Uuid,
        title: String,
        body: String,
    ) -> Result<Question, StoreError>;
    async fn get_question(&self, id: i64) -> Result<Option<Question>, StoreError>;
    async fn list_questions(&self) -> Result<Vec<Question>, StoreError>;
    async fn update_question(
        &self,
        id: i64,
        req: UpdateQuestionRequest,
    ) -> Result<Option<Question>, StoreError>;
    async fn delete_question(&self, id: i64) -> Result<bool, StoreError>;

    // --- Answers ---
    async fn create_answer(
        &self,
        question_id: i64,
        user_id: Uuid,
        body: String,
    ) -> Result<Answer, StoreError>;
    async fn get_answer(&self, id: i64) -> Result<Option<Answer>, StoreError>;
    async fn list_answers(&self) -> Result<Vec<Answer>, StoreError>;
    async fn answers_by_question(&self, question_id: i64) -> Result<Vec<Answer>, StoreError>;
    async fn update_answer(
        &self,
        id: i64,
        req: UpdateAnswerRequest,
    ) -> Result<Option<Answer>, StoreError>;
    async fn delete_answer(&self, id: i64) -> Result<bool, StoreError>;

    // --- Comments ---
    async fn create_comment(
        &self,
        user_id: Uuid,
        parent: CommentParent,
        content: String,
    ) -> Result<Comment, StoreError>;
    async fn get_comment(&self, id: i64) -> Result<Option<Comment>, StoreError>;
    async fn list_comments(&self) -> Result<Vec<Comment>, StoreError>;
    /// All comments in a question's subtree: attached directly to the
    /// question or to any of its answers.
    async fn comments_for_question(&self, question_id: i64) -> Result<Vec<Comment>, StoreError>;
    async fn comments_by_answer(&self, answer_id: i64) -> Result<Vec<Comment>, StoreError>;
    async fn update_comment(&self, id: i64, content: String)
    -> Result<Option<Comment>, StoreError>;
    async fn delete_comment(&self, id: i64) -> Result<bool, StoreError>;
}

/// The shared handle type for the store across the application state.
pub type StoreState = Arc<dyn AggregateStore>;

/// PostgresStore
///
/// Production implementation backed by a Postgres connection pool. Uses the
/// runtime query API throughout; per-row atomicity of these statements is the
/// only transactional guarantee the rest of the system relies on.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregateStore for PostgresStore {
    async fn create_user(
        &self,
        username: String,
        password_hash: String,
        role: Role,
    ) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, username, password_hash, role, created_at) \
             VALUES ($1, $2, $3, $4, NOW()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn update_user(
        &self,
        id: Uuid,
        username: Option<String>,
        password_hash: Option<String>,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET username = COALESCE($2, username), \
             password_hash = COALESCE($3, password_hash) WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(username)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_question(
        &self,
        user_id: Uuid,
        title: String,
        body: String,
    ) -> Result<Question, StoreError> {
        let question = sqlx::query_as::<_, Question>(
            "INSERT INTO questions (user_id, title, body, created_at) \
             VALUES ($1, $2, $3, NOW()) RETURNING *",
        )
        .bind(user_id)
        .bind(title)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;
        Ok(question)
    }

    async fn get_question(&self, id: i64) -> Result<Option<Question>, StoreError> {
        let question = sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(question)
    }

    async fn list_questions(&self) -> Result<Vec<Question>, StoreError> {
        let questions =
            sqlx::query_as::<_, Question>("SELECT * FROM questions ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(questions)
    }

    async fn update_question(
        &self,
        id: i64,
        req: UpdateQuestionRequest,
    ) -> Result<Option<Question>, StoreError> {
        let question = sqlx::query_as::<_, Question>(
            "UPDATE questions SET title = COALESCE($2, title), \
             body = COALESCE($3, body) WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(req.title)
        .bind(req.body)
        .fetch_optional(&self.pool)
        .await?;
        Ok(question)
    }

    async fn delete_question(&self, id: i64) -> Result<bool, StoreError> {
        // Child rows cascade via the schema's ON DELETE CASCADE constraints.
        let result = sqlx::query("DELETE FROM questions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_answer(
        &self,
        question_id: i64,
        user_id: Uuid,
        body: String,
    ) -> Result<Answer, StoreError> {
        let answer = sqlx::query_as::<_, Answer>(
            "INSERT INTO answers (question_id, user_id, body, rating, is_best, created_at) \
             VALUES ($1, $2, $3, 0, false, NOW()) RETURNING *",
        )
        .bind(question_id)
        .bind(user_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;
        Ok(answer)
    }

    async fn get_answer(&self, id: i64) -> Result<Option<Answer>, StoreError> {
        let answer = sqlx::query_as::<_, Answer>("SELECT * FROM answers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(answer)
    }

    async fn list_answers(&self) -> Result<Vec<Answer>, StoreError> {
        let answers = sqlx::query_as::<_, Answer>("SELECT * FROM answers ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(answers)
    }

    async fn answers_by_question(&self, question_id: i64) -> Result<Vec<Answer>, StoreError> {
        let answers = sqlx::query_as::<_, Answer>(
            "SELECT * FROM answers WHERE question_id = $1 ORDER BY created_at",
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(answers)
    }

    async fn update_answer(
        &self,
        id: i64,
        req: UpdateAnswerRequest,
    ) -> Result<Option<Answer>, StoreError> {
        let answer = sqlx::query_as::<_, Answer>(
            "UPDATE answers SET body = COALESCE($2, body), \
             rating = COALESCE($3, rating), is_best = COALESCE($4, is_best) \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(req.body)
        .bind(req.rating)
        .bind(req.is_best)
        .fetch_optional(&self.pool)
        .await?;
        Ok(answer)
    }

    async fn delete_answer(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM answers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_comment(
        &self,
        user_id: Uuid,
        parent: CommentParent,
        content: String,
    ) -> Result<Comment, StoreError> {
        let comment = sqlx::query_as::<_, Comment>(
            "INSERT INTO comments (user_id, question_id, answer_id, content, created_at) \
             VALUES ($1, $2, $3, $4, NOW()) RETURNING *",
        )
        .bind(user_id)
        .bind(parent.question_id())
        .bind(parent.answer_id())
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn get_comment(&self, id: i64) -> Result<Option<Comment>, StoreError> {
        let comment = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(comment)
    }

    async fn list_comments(&self) -> Result<Vec<Comment>, StoreError> {
        let comments = sqlx::query_as::<_, Comment>("SELECT * FROM comments ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(comments)
    }

    async fn comments_for_question(&self, question_id: i64) -> Result<Vec<Comment>, StoreError> {
        let comments = sqlx::query_as::<_, Comment>(
            "SELECT c.* FROM comments c \
             LEFT JOIN answers a ON c.answer_id = a.id \
             WHERE c.question_id = $1 OR a.question_id = $1 \
             ORDER BY c.created_at",
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }

    async fn comments_by_answer(&self, answer_id: i64) -> Result<Vec<Comment>, StoreError> {
        let comments = sqlx::query_as::<_, Comment>(
            "SELECT * FROM comments WHERE answer_id = $1 ORDER BY created_at",
        )
        .bind(answer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }

    async fn update_comment(
        &self,
        id: i64,
        content: String,
    ) -> Result<Option<Comment>, StoreError> {
        let comment = sqlx::query_as::<_, Comment>(
            "UPDATE comments SET content = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn delete_comment(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// MemoryStore
///
/// In-memory arena of flat records keyed by id. Used by the test suite and
/// usable as a standalone demo backend; it implements the same authoritative
/// contract as Postgres, including cascading deletes.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    questions: DashMap<i64, Question>,
    answers: DashMap<i64, Answer>,
    comments: DashMap<i64, Comment>,
    question_seq: AtomicI64,
    answer_seq: AtomicI64,
    comment_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted<T: Clone>(map: &DashMap<i64, T>) -> Vec<T> {
        let mut entries: Vec<(i64, T)> = map
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, value)| value).collect()
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn create_user(
        &self,
        username: String,
        password_hash: String,
        role: Role,
    ) -> Result<User, StoreError> {
        let user = User {
            id: Uuid::new_v4(),
            username,
            password_hash,
            role,
            created_at: Utc::now(),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.clone()))
    }

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.users.get(id).map(|u| u.clone()))
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn update_user(
        &self,
        id: Uuid,
        username: Option<String>,
        password_hash: Option<String>,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.users.get_mut(&id).map(|mut user| {
            if let Some(username) = username {
                user.username = username;
            }
            if let Some(hash) = password_hash {
                user.password_hash = hash;
            }
            user.clone()
        }))
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.users.remove(&id).is_some())
    }

    async fn create_question(
        &self,
        user_id: Uuid,
        title: String,
        body: String,
    ) -> Result<Question, StoreError> {
        let question = Question {
            id: self.question_seq.fetch_add(1, Ordering::SeqCst) + 1,
            user_id,
            title,
            body,
            created_at: Utc::now(),
        };
        self.questions.insert(question.id, question.clone());
        Ok(question)
    }

    async fn get_question(&self, id: i64) -> Result<Option<Question>, StoreError> {
        Ok(self.questions.get(&id).map(|q| q.clone()))
    }

    async fn list_questions(&self) -> Result<Vec<Question>, StoreError> {
        let mut questions = Self::sorted(&self.questions);
        questions.reverse(); // newest first, matching the Postgres ordering
        Ok(questions)
    }

    async fn update_question(
        &self,
        id: i64,
        req: UpdateQuestionRequest,
    ) -> Result<Option<Question>, StoreError> {
        Ok(self.questions.get_mut(&id).map(|mut question| {
            if let Some(title) = req.title {
                question.title = title;
            }
            if let Some(body) = req.body {
                question.body = body;
            }
            question.clone()
        }))
    }

    async fn delete_question(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self.questions.remove(&id).is_some();
        if removed {
            let orphaned: Vec<i64> = self
                .answers
                .iter()
                .filter(|a| a.question_id == id)
                .map(|a| a.id)
                .collect();
            for answer_id in orphaned {
                self.answers.remove(&answer_id);
                self.comments
                    .retain(|_, c| c.answer_id != Some(answer_id));
            }
            self.comments.retain(|_, c| c.question_id != Some(id));
        }
        Ok(removed)
    }

    async fn create_answer(
        &self,
        question_id: i64,
        user_id: Uuid,
        body: String,
    ) -> Result<Answer, StoreError> {
        let answer = Answer {
            id: self.answer_seq.fetch_add(1, Ordering::SeqCst) + 1,
            question_id,
            user_id,
            body,
            rating: 0,
            is_best: false,
            created_at: Utc::now(),
        };
        self.answers.insert(answer.id, answer.clone());
        Ok(answer)
    }

    async fn get_answer(&self, id: i64) -> Result<Option<Answer>, StoreError> {
        Ok(self.answers.get(&id).map(|a| a.clone()))
    }

    async fn list_answers(&self) -> Result<Vec<Answer>, StoreError> {
        Ok(Self::sorted(&self.answers))
    }

    async fn answers_by_question(&self, question_id: i64) -> Result<Vec<Answer>, StoreError> {
        Ok(Self::sorted(&self.answers)
            .into_iter()
            .filter(|a| a.question_id == question_id)
            .collect())
    }

    async fn update_answer(
        &self,
        id: i64,
        req: UpdateAnswerRequest,
    ) -> Result<Option<Answer>, StoreError> {
        Ok(self.answers.get_mut(&id).map(|mut answer| {
            if let Some(body) = req.body {
                answer.body = body;
            }
            if let Some(rating) = req.rating {
                answer.rating = rating;
            }
            if let Some(is_best) = req.is_best {
                answer.is_best = is_best;
            }
            answer.clone()
        }))
    }

    async fn delete_answer(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self.answers.remove(&id).is_some();
        if removed {
            self.comments.retain(|_, c| c.answer_id != Some(id));
        }
        Ok(removed)
    }

    async fn create_comment(
        &self,
        user_id: Uuid,
        parent: CommentParent,
        content: String,
    ) -> Result<Comment, StoreError> {
        let comment = Comment {
            id: self.comment_seq.fetch_add(1, Ordering::SeqCst) + 1,
            user_id,
            question_id: parent.question_id(),
            answer_id: parent.answer_id(),
            content,
            created_at: Utc::now(),
        };
        self.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, id: i64) -> Result<Option<Comment>, StoreError> {
        Ok(self.comments.get(&id).map(|c| c.clone()))
    }

    async fn list_comments(&self) -> Result<Vec<Comment>, StoreError> {
        Ok(Self::sorted(&self.comments))
    }

    async fn comments_for_question(&self, question_id: i64) -> Result<Vec<Comment>, StoreError> {
        let answer_ids: std::collections::HashSet<i64> = self
            .answers
            .iter()
            .filter(|a| a.question_id == question_id)
            .map(|a| a.id)
            .collect();
        Ok(Self::sorted(&self.comments)
            .into_iter()
            .filter(|c| {
                c.question_id == Some(question_id)
                    || c.answer_id.is_some_and(|aid| answer_ids.contains(&aid))
            })
            .collect())
    }

    async fn comments_by_answer(&self, answer_id: i64) -> Result<Vec<Comment>, StoreError> {
        Ok(Self::sorted(&self.comments)
            .into_iter()
            .filter(|c| c.answer_id == Some(answer_id))
            .collect())
    }

    async fn update_comment(
        &self,
        id: i64,
        content: String,
    ) -> Result<Option<Comment>, StoreError> {
        Ok(self.comments.get_mut(&id).map(|mut comment| {
            comment.content = content;
            comment.clone()
        }))
    }

    async fn delete_comment(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.comments.remove(&id).is_some())
    }
}

/// Collects the author records referenced by a question subtree into a map
/// for the pure view assemblers.
pub fn user_map(users: Vec<User>) -> HashMap<Uuid, User> {
    users.into_iter().map(|u| (u.id, u)).collect()
}
