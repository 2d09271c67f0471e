use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::cache::{CacheState, LookasideCache as _};
use crate::error::ApiError;
use crate::models::{
    Answer, AnswerView, Comment, CommentParent, CommentView, Question, QuestionView,
    UpdateAnswerRequest, UpdateQuestionRequest, UserView, assemble_answer_view,
    assemble_comment_view, assemble_question_view,
};
use crate::store::{AggregateStore as _, StoreState, user_map};

/// Detached fan-out work gets its own deadline so a stalled cache backend
/// cannot leak tasks indefinitely.
const FANOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on concurrent in-flight store/cache calls issued through the
/// coordinator. Slow external backends queue here instead of starving the
/// accept loop.
const IO_PERMITS: usize = 64;

/// IoLimiter
///
/// The single asynchronous boundary in front of the external collaborators.
/// Every store or cache round-trip holds one permit for its duration.
#[derive(Clone)]
pub struct IoLimiter {
    permits: Arc<Semaphore>,
}

impl IoLimiter {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Acquires a permit. The semaphore is never closed, so a `None` here
    /// only happens during shutdown; callers proceed unthrottled in that case.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }
}

impl Default for IoLimiter {
    fn default() -> Self {
        Self::new(IO_PERMITS)
    }
}

/// RefreshTarget
///
/// One projection to rebuild (or drop) after an authoritative write. Fan-out
/// from a single write may touch several of these: a comment under an answer
/// refreshes the comment itself, the answer, and the enclosing question.
#[derive(Debug, Clone, Copy)]
enum RefreshTarget {
    Question(i64),
    Answer(i64),
    Comment(i64),
    User(Uuid),
}

impl RefreshTarget {
    fn key(self) -> String {
        match self {
            RefreshTarget::Question(id) => question_key(id),
            RefreshTarget::Answer(id) => answer_key(id),
            RefreshTarget::Comment(id) => comment_key(id),
            RefreshTarget::User(id) => user_key(id),
        }
    }
}

// Namespaced cache keys; the prefixes guarantee no collisions across types.

pub fn question_key(id: i64) -> String {
    format!("question:{id}")
}

pub fn answer_key(id: i64) -> String {
    format!("answer:{id}")
}

pub fn comment_key(id: i64) -> String {
    format!("comment:{id}")
}

pub fn user_key(id: Uuid) -> String {
    format!("user:{id}")
}

/// CacheConsistencyCoordinator
///
/// Orchestrates every interaction between the authoritative store and the
/// look-aside cache:
///
/// - **read-through** loads: cache hit, else store + populate;
/// - **write + fan-out**: the store write is authoritative and fatal on
///   failure; affected projections are then rebuilt in a detached task whose
///   failures are logged and swallowed;
/// - **delete + invalidate**: the deleted entity's key and every parent
///   projection that embedded it are dropped, so a deleted child cannot
///   linger in a stale parent until TTL.
///
/// The two stores share no transaction. A crash between the store write and
/// the fan-out leaves the cache stale for at most one TTL, which is the
/// accepted consistency bound.
pub struct CacheConsistencyCoordinator {
    store: StoreState,
    cache: CacheState,
    limiter: IoLimiter,
    ttl: Duration,
}

impl CacheConsistencyCoordinator {
    pub fn new(store: StoreState, cache: CacheState, limiter: IoLimiter, ttl: Duration) -> Self {
        Self {
            store,
            cache,
            limiter,
            ttl,
        }
    }

    // --- Cache plumbing ---

    /// Decodes a cached value; a deserialization failure is a miss, never an
    /// error — the entry is dropped so the next read repopulates it.
    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.cache.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable cache entry, treating as miss");
                self.cache.delete(key).await;
                None
            }
        }
    }

    async fn populate<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.cache.set(key, bytes, self.ttl).await,
            Err(e) => tracing::warn!(key = %key, error = %e, "projection serialization failed"),
        }
    }

    /// Rebuilds the listed projections from the store in a detached task.
    /// The task survives caller disconnection but runs under its own timeout.
    fn spawn_refresh(&self, targets: Vec<RefreshTarget>) {
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let limiter = self.limiter.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            let work = refresh_projections(store, cache, limiter, ttl, targets);
            if tokio::time::timeout(FANOUT_TIMEOUT, work).await.is_err() {
                tracing::warn!("cache fan-out timed out");
            }
        });
    }

    // --- Raw record access (for authorization and parent checks) ---

    pub async fn question_record(&self, id: i64) -> Result<Question, ApiError> {
        let _permit = self.limiter.acquire().await;
        self.store
            .get_question(id)
            .await?
            .ok_or(ApiError::NotFound("question"))
    }

    pub async fn answer_record(&self, id: i64) -> Result<Answer, ApiError> {
        let _permit = self.limiter.acquire().await;
        self.store
            .get_answer(id)
            .await?
            .ok_or(ApiError::NotFound("answer"))
    }

    pub async fn comment_record(&self, id: i64) -> Result<Comment, ApiError> {
        let _permit = self.limiter.acquire().await;
        self.store
            .get_comment(id)
            .await?
            .ok_or(ApiError::NotFound("comment"))
    }

    // --- Read-through loads ---

    pub async fn load_question(&self, id: i64) -> Result<QuestionView, ApiError> {
        let key = question_key(id);
        if let Some(view) = self.cached::<QuestionView>(&key).await {
            return Ok(view);
        }
        let _permit = self.limiter.acquire().await;
        let view = build_question_view(&self.store, id)
            .await?
            .ok_or(ApiError::NotFound("question"))?;
        self.populate(&key, &view).await;
        Ok(view)
    }

    pub async fn load_answer(&self, id: i64) -> Result<AnswerView, ApiError> {
        let key = answer_key(id);
        if let Some(view) = self.cached::<AnswerView>(&key).await {
            return Ok(view);
        }
        let _permit = self.limiter.acquire().await;
        let view = build_answer_view(&self.store, id)
            .await?
            .ok_or(ApiError::NotFound("answer"))?;
        self.populate(&key, &view).await;
        Ok(view)
    }

    pub async fn load_comment(&self, id: i64) -> Result<CommentView, ApiError> {
        let key = comment_key(id);
        if let Some(view) = self.cached::<CommentView>(&key).await {
            return Ok(view);
        }
        let _permit = self.limiter.acquire().await;
        let view = build_comment_view(&self.store, id)
            .await?
            .ok_or(ApiError::NotFound("comment"))?;
        self.populate(&key, &view).await;
        Ok(view)
    }

    pub async fn load_user(&self, id: Uuid) -> Result<UserView, ApiError> {
        let key = user_key(id);
        if let Some(view) = self.cached::<UserView>(&key).await {
            return Ok(view);
        }
        let _permit = self.limiter.acquire().await;
        let user = self
            .store
            .get_user(id)
            .await?
            .ok_or(ApiError::NotFound("user"))?;
        let view = UserView::from(&user);
        self.populate(&key, &view).await;
        Ok(view)
    }

    // --- Writes with fan-out ---

    pub async fn create_question(
        &self,
        user_id: Uuid,
        title: String,
        body: String,
    ) -> Result<QuestionView, ApiError> {
        let _permit = self.limiter.acquire().await;
        let question = self.store.create_question(user_id, title, body).await?;
        let users = user_map(self.store.get_users(&[user_id]).await?);
        let view = assemble_question_view(&question, &[], &[], &users);
        self.spawn_refresh(vec![RefreshTarget::Question(question.id)]);
        Ok(view)
    }

    /// Persists a new answer under `question`, then fans the write out to
    /// the answer's own projection and the parent question's.
    pub async fn create_answer(
        &self,
        question: &Question,
        user_id: Uuid,
        body: String,
    ) -> Result<AnswerView, ApiError> {
        let _permit = self.limiter.acquire().await;
        let answer = self
            .store
            .create_answer(question.id, user_id, body)
            .await?;
        let users = user_map(self.store.get_users(&[user_id]).await?);
        let view = assemble_answer_view(&answer, &[], &users);
        self.spawn_refresh(vec![
            RefreshTarget::Answer(answer.id),
            RefreshTarget::Question(question.id),
        ]);
        Ok(view)
    }

    /// Persists a new comment, then refreshes every projection that embeds
    /// it: the comment itself, the answer (when commenting on one), and the
    /// enclosing question. `question_id` is the id of that enclosing
    /// question regardless of which parent kind the comment attaches to.
    pub async fn create_comment(
        &self,
        user_id: Uuid,
        parent: CommentParent,
        question_id: i64,
        content: String,
    ) -> Result<CommentView, ApiError> {
        let _permit = self.limiter.acquire().await;
        let comment = self.store.create_comment(user_id, parent, content).await?;
        let users = user_map(self.store.get_users(&[user_id]).await?);
        let view = assemble_comment_view(&comment, &users);

        let mut targets = vec![RefreshTarget::Comment(comment.id)];
        if let CommentParent::Answer(answer_id) = parent {
            targets.push(RefreshTarget::Answer(answer_id));
        }
        targets.push(RefreshTarget::Question(question_id));
        self.spawn_refresh(targets);
        Ok(view)
    }

    pub async fn update_question(
        &self,
        id: i64,
        req: UpdateQuestionRequest,
    ) -> Result<QuestionView, ApiError> {
        let _permit = self.limiter.acquire().await;
        let question = self
            .store
            .update_question(id, req)
            .await?
            .ok_or(ApiError::NotFound("question"))?;
        self.spawn_refresh(vec![RefreshTarget::Question(question.id)]);
        self.load_fresh_question(question.id).await
    }

    pub async fn update_answer(
        &self,
        answer: &Answer,
        req: UpdateAnswerRequest,
    ) -> Result<AnswerView, ApiError> {
        let _permit = self.limiter.acquire().await;
        let updated = self
            .store
            .update_answer(answer.id, req)
            .await?
            .ok_or(ApiError::NotFound("answer"))?;
        self.spawn_refresh(vec![
            RefreshTarget::Answer(updated.id),
            RefreshTarget::Question(updated.question_id),
        ]);
        let view = build_answer_view(&self.store, updated.id)
            .await?
            .ok_or(ApiError::NotFound("answer"))?;
        Ok(view)
    }

    pub async fn update_comment(
        &self,
        comment: &Comment,
        content: String,
    ) -> Result<CommentView, ApiError> {
        let _permit = self.limiter.acquire().await;
        let updated = self
            .store
            .update_comment(comment.id, content)
            .await?
            .ok_or(ApiError::NotFound("comment"))?;
        let mut targets = vec![RefreshTarget::Comment(updated.id)];
        if let Some(answer_id) = updated.answer_id {
            targets.push(RefreshTarget::Answer(answer_id));
        }
        if let Some(question_id) = self.enclosing_question_id(&updated).await? {
            targets.push(RefreshTarget::Question(question_id));
        }
        self.spawn_refresh(targets);
        let users = user_map(self.store.get_users(&[updated.user_id]).await?);
        Ok(assemble_comment_view(&updated, &users))
    }

    pub async fn update_user(
        &self,
        id: Uuid,
        username: Option<String>,
        password_hash: Option<String>,
    ) -> Result<UserView, ApiError> {
        let _permit = self.limiter.acquire().await;
        let user = self
            .store
            .update_user(id, username, password_hash)
            .await?
            .ok_or(ApiError::NotFound("user"))?;
        let view = UserView::from(&user);
        self.spawn_refresh(vec![RefreshTarget::User(user.id)]);
        Ok(view)
    }

    // --- Deletes with invalidation ---

    pub async fn delete_question(&self, id: i64) -> Result<(), ApiError> {
        let _permit = self.limiter.acquire().await;
        // Enumerate child answers first; their projections must not outlive
        // the aggregate they belong to.
        let answers = self.store.answers_by_question(id).await?;
        if !self.store.delete_question(id).await? {
            return Err(ApiError::NotFound("question"));
        }
        self.cache.delete(&question_key(id)).await;
        for answer in answers {
            self.cache.delete(&answer_key(answer.id)).await;
        }
        Ok(())
    }

    pub async fn delete_answer(&self, answer: &Answer) -> Result<(), ApiError> {
        let _permit = self.limiter.acquire().await;
        if !self.store.delete_answer(answer.id).await? {
            return Err(ApiError::NotFound("answer"));
        }
        self.cache.delete(&answer_key(answer.id)).await;
        // The parent question embedded this answer; drop it rather than
        // refresh so a failed rebuild cannot resurrect the child.
        self.cache.delete(&question_key(answer.question_id)).await;
        Ok(())
    }

    pub async fn delete_comment(&self, comment: &Comment) -> Result<(), ApiError> {
        let _permit = self.limiter.acquire().await;
        let question_id = self.enclosing_question_id(comment).await?;
        if !self.store.delete_comment(comment.id).await? {
            return Err(ApiError::NotFound("comment"));
        }
        self.cache.delete(&comment_key(comment.id)).await;
        if let Some(answer_id) = comment.answer_id {
            self.cache.delete(&answer_key(answer_id)).await;
        }
        if let Some(question_id) = question_id {
            self.cache.delete(&question_key(question_id)).await;
        }
        Ok(())
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<(), ApiError> {
        let _permit = self.limiter.acquire().await;
        if !self.store.delete_user(id).await? {
            return Err(ApiError::NotFound("user"));
        }
        self.cache.delete(&user_key(id)).await;
        Ok(())
    }

    // --- Helpers ---

    /// The id of the question enclosing `comment`, resolved through the
    /// answer when the comment hangs off one. `None` only if the parent
    /// answer vanished concurrently.
    async fn enclosing_question_id(&self, comment: &Comment) -> Result<Option<i64>, ApiError> {
        if let Some(question_id) = comment.question_id {
            return Ok(Some(question_id));
        }
        if let Some(answer_id) = comment.answer_id {
            return Ok(self
                .store
                .get_answer(answer_id)
                .await?
                .map(|a| a.question_id));
        }
        Ok(None)
    }

    /// Rebuilds the question projection from the store and repopulates the
    /// cache synchronously. Used after updates where the response must show
    /// the new state immediately.
    async fn load_fresh_question(&self, id: i64) -> Result<QuestionView, ApiError> {
        let view = build_question_view(&self.store, id)
            .await?
            .ok_or(ApiError::NotFound("question"))?;
        self.populate(&question_key(id), &view).await;
        Ok(view)
    }
}

// --- Projection builders (store-only, no cache involvement) ---

async fn build_question_view(
    store: &StoreState,
    id: i64,
) -> Result<Option<QuestionView>, ApiError> {
    let Some(question) = store.get_question(id).await? else {
        return Ok(None);
    };
    let answers = store.answers_by_question(id).await?;
    let comments = store.comments_for_question(id).await?;

    let mut author_ids: Vec<Uuid> = vec![question.user_id];
    author_ids.extend(answers.iter().map(|a| a.user_id));
    author_ids.extend(comments.iter().map(|c| c.user_id));
    author_ids.sort_unstable();
    author_ids.dedup();
    let users = user_map(store.get_users(&author_ids).await?);

    Ok(Some(assemble_question_view(
        &question, &answers, &comments, &users,
    )))
}

async fn build_answer_view(store: &StoreState, id: i64) -> Result<Option<AnswerView>, ApiError> {
    let Some(answer) = store.get_answer(id).await? else {
        return Ok(None);
    };
    let comments = store.comments_by_answer(id).await?;

    let mut author_ids: Vec<Uuid> = vec![answer.user_id];
    author_ids.extend(comments.iter().map(|c| c.user_id));
    author_ids.sort_unstable();
    author_ids.dedup();
    let users = user_map(store.get_users(&author_ids).await?);

    Ok(Some(assemble_answer_view(&answer, &comments, &users)))
}

async fn build_comment_view(store: &StoreState, id: i64) -> Result<Option<CommentView>, ApiError> {
    let Some(comment) = store.get_comment(id).await? else {
        return Ok(None);
    };
    let users = user_map(store.get_users(&[comment.user_id]).await?);
    Ok(Some(assemble_comment_view(&comment, &users)))
}

/// The detached fan-out body: rebuild each projection from the store and
/// write it back with the standard TTL. A target whose record is gone is
/// invalidated instead of refreshed. Every failure here is logged and
/// swallowed — the caller's response already reflects the authoritative
/// write.
async fn refresh_projections(
    store: StoreState,
    cache: CacheState,
    limiter: IoLimiter,
    ttl: Duration,
    targets: Vec<RefreshTarget>,
) {
    for target in targets {
        let _permit = limiter.acquire().await;
        let key = target.key();
        let encoded = match target {
            RefreshTarget::Question(id) => build_question_view(&store, id)
                .await
                .map(|view| view.map(|v| serde_json::to_vec(&v))),
            RefreshTarget::Answer(id) => build_answer_view(&store, id)
                .await
                .map(|view| view.map(|v| serde_json::to_vec(&v))),
            RefreshTarget::Comment(id) => build_comment_view(&store, id)
                .await
                .map(|view| view.map(|v| serde_json::to_vec(&v))),
            RefreshTarget::User(id) => store
                .get_user(id)
                .await
                .map_err(ApiError::from)
                .map(|user| user.map(|u| serde_json::to_vec(&UserView::from(&u)))),
        };

        match encoded {
            Ok(Some(Ok(bytes))) => {
                cache.set(&key, bytes, ttl).await;
                tracing::debug!(key = %key, "projection refreshed");
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(key = %key, error = %e, "projection serialization failed");
            }
            Ok(None) => {
                // Record vanished between the write and the fan-out.
                cache.delete(&key).await;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "projection refresh failed");
            }
        }
    }
}
