use std::sync::Arc;

use qna_portal::cache::{CacheState, MemoryCache};
use qna_portal::config::AppConfig;
use qna_portal::policy::Role;
use qna_portal::store::{AggregateStore, MemoryStore, StoreState};
use qna_portal::token::TokenCodec;
use qna_portal::{AppState, create_router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use uuid::Uuid;

struct TestApp {
    address: String,
    store: Arc<MemoryStore>,
    codec: TokenCodec,
}

async fn spawn_app() -> TestApp {
    let config = AppConfig::default();
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let codec = TokenCodec::new(&config.jwt_secret, config.token_lifetime);

    let state = AppState::new(
        Arc::clone(&store) as StoreState,
        cache as CacheState,
        codec.clone(),
        config,
    );
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        store,
        codec,
    }
}

/// Registers an account through the API and logs in, returning (id, token).
async fn register_and_login(
    app: &TestApp,
    client: &reqwest::Client,
    username: &str,
) -> (Uuid, String) {
    let response = client
        .post(format!("{}/users/auth", app.address))
        .json(&json!({"username": username, "password": "password123"}))
        .send()
        .await
        .expect("register");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("register body");
    let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

    let response = client
        .post(format!("{}/users/login", app.address))
        .json(&json!({"username": username, "password": "password123"}))
        .send()
        .await
        .expect("login");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("login body");
    (id, body["token"].as_str().unwrap().to_string())
}

/// Seeds an admin directly in the store and mints a token for it. Admin
/// accounts are never created through the public API.
async fn seed_admin(app: &TestApp, username: &str) -> (Uuid, String) {
    let admin = app
        .store
        .create_user(username.into(), "seeded-hash".into(), Role::Admin)
        .await
        .unwrap();
    let token = app.codec.issue(admin.id).unwrap();
    (admin.id, token)
}

async fn create_question(
    app: &TestApp,
    client: &reqwest::Client,
    token: &str,
    title: &str,
) -> i64 {
    let response = client
        .post(format!("{}/questions", app.address))
        .bearer_auth(token)
        .json(&json!({"title": title, "body": "a body"}))
        .send()
        .await
        .expect("create question");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("question body");
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn health_check_works() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn registration_rejects_duplicate_usernames() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let payload = json!({"username": "taken", "password": "password123"});
    let response = client
        .post(format!("{}/users/auth", app.address))
        .json(&payload)
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    // The outward shape never carries credential material.
    assert!(body.get("password_hash").is_none());
    assert_eq!(body["role"], "user");

    let response = client
        .post(format!("{}/users/auth", app.address))
        .json(&payload)
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn login_with_a_wrong_password_is_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_and_login(&app, &client, "mallory").await;

    let response = client
        .post(format!("{}/users/login", app.address))
        .json(&json!({"username": "mallory", "password": "wrong"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn me_returns_the_callers_own_profile() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (id, token) = register_and_login(&app, &client, "nina").await;

    let response = client
        .get(format!("{}/users/me", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"].as_str().unwrap(), id.to_string());
    assert_eq!(body["username"], "nina");
}

#[tokio::test]
async fn question_lifecycle_create_read_list() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "oscar").await;

    let question_id = create_question(&app, &client, &token, "how do caches work").await;

    // Anonymous read of the aggregate.
    let response = client
        .get(format!("{}/questions/{}", app.address, question_id))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["title"], "how do caches work");
    assert_eq!(body["user"]["username"], "oscar");

    let response = client
        .get(format!("{}/questions", app.address))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn question_updates_and_deletes_are_admin_only() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "peggy").await;
    let (_, admin_token) = seed_admin(&app, "root").await;

    let question_id = create_question(&app, &client, &token, "mine").await;

    // The author alone cannot edit it.
    let response = client
        .put(format!("{}/questions/{}", app.address, question_id))
        .bearer_auth(&token)
        .json(&json!({"title": "edited"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 403);

    let response = client
        .put(format!("{}/questions/{}", app.address, question_id))
        .bearer_auth(&admin_token)
        .json(&json!({"title": "edited"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["title"], "edited");

    let response = client
        .delete(format!("{}/questions/{}", app.address, question_id))
        .bearer_auth(&admin_token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 204);

    let response = client
        .get(format!("{}/questions/{}", app.address, question_id))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn empty_comment_content_is_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "quinn").await;
    let question_id = create_question(&app, &client, &token, "q").await;

    let response = client
        .post(format!("{}/comments/question/{}", app.address, question_id))
        .bearer_auth(&token)
        .json(&json!({"content": "   "}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn commenting_on_a_missing_parent_is_a_404() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "rita").await;

    let response = client
        .post(format!("{}/comments/question/9999", app.address))
        .bearer_auth(&token)
        .json(&json!({"content": "hello?"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 404);

    let response = client
        .post(format!("{}/comments/answer/9999", app.address))
        .bearer_auth(&token)
        .json(&json!({"content": "hello?"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn users_cannot_delete_other_peoples_comments() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, author_token) = register_and_login(&app, &client, "steve").await;
    let (_, other_token) = register_and_login(&app, &client, "trudy").await;
    let (_, admin_token) = seed_admin(&app, "root").await;

    let question_id = create_question(&app, &client, &author_token, "q").await;
    let response = client
        .post(format!("{}/comments/question/{}", app.address, question_id))
        .bearer_auth(&author_token)
        .json(&json!({"content": "first!"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 201);
    let comment: Value = response.json().await.unwrap();
    let comment_id = comment["id"].as_i64().unwrap();

    // Another plain user: known caller, denied action.
    let response = client
        .delete(format!("{}/comments/{}", app.address, comment_id))
        .bearer_auth(&other_token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("insufficient rights")
    );

    // The admin override works.
    let response = client
        .delete(format!("{}/comments/{}", app.address, comment_id))
        .bearer_auth(&admin_token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 204);

    let response = client
        .get(format!("{}/comments/{}", app.address, comment_id))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn comment_authors_can_edit_their_own_comments() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "uma").await;
    let question_id = create_question(&app, &client, &token, "q").await;

    let response = client
        .post(format!("{}/comments/question/{}", app.address, question_id))
        .bearer_auth(&token)
        .json(&json!({"content": "draft"}))
        .send()
        .await
        .expect("req fail");
    let comment: Value = response.json().await.unwrap();
    let comment_id = comment["id"].as_i64().unwrap();

    let response = client
        .put(format!("{}/comments/{}", app.address, comment_id))
        .bearer_auth(&token)
        .json(&json!({"content": "final"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"], "final");
}

#[tokio::test]
async fn answer_update_requires_ownership_and_the_admin_role_together() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, user_token) = register_and_login(&app, &client, "victor").await;
    let (admin_id, admin_token) = seed_admin(&app, "root").await;

    let question_id = create_question(&app, &client, &user_token, "q").await;

    // The plain user answers their own question.
    let response = client
        .post(format!("{}/answers/question/{}", app.address, question_id))
        .bearer_auth(&user_token)
        .json(&json!({"body": "user answer"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 201);
    let answer: Value = response.json().await.unwrap();
    let user_answer_id = answer["id"].as_i64().unwrap();

    // Owner without the admin role: denied.
    let response = client
        .put(format!("{}/answers/{}", app.address, user_answer_id))
        .bearer_auth(&user_token)
        .json(&json!({"body": "edited"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 403);

    // Admin without ownership: also denied.
    let response = client
        .put(format!("{}/answers/{}", app.address, user_answer_id))
        .bearer_auth(&admin_token)
        .json(&json!({"body": "edited"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 403);

    // Admin editing an answer they own: allowed.
    let admin_answer = app
        .store
        .create_answer(question_id, admin_id, "admin answer".into())
        .await
        .unwrap();
    let response = client
        .put(format!("{}/answers/{}", app.address, admin_answer.id))
        .bearer_auth(&admin_token)
        .json(&json!({"body": "edited by its admin owner", "is_best": true}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["body"], "edited by its admin owner");
    assert_eq!(body["is_best"], true);
}

#[tokio::test]
async fn pagination_slices_and_filters_by_owner() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, alice_token) = register_and_login(&app, &client, "alice").await;
    let (_, bob_token) = register_and_login(&app, &client, "bob").await;

    for i in 0..3 {
        create_question(&app, &client, &alice_token, &format!("alice {i}")).await;
    }
    create_question(&app, &client, &bob_token, "bob 0").await;

    // Anonymous caller gets the full set, sliced.
    let response = client
        .get(format!(
            "{}/questions/paginated?page=0&size=2",
            app.address
        ))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total_items"], 4);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["questions"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_next"], true);
    assert_eq!(body["has_prev"], false);

    // Authenticated caller can restrict to their own questions.
    let response = client
        .get(format!(
            "{}/questions/paginated?page=0&size=10&mine=true",
            app.address
        ))
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("req fail");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total_items"], 3);

    // Anonymous `mine` is ignored, not rejected.
    let response = client
        .get(format!(
            "{}/questions/paginated?page=0&size=10&mine=true",
            app.address
        ))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total_items"], 4);

    // A zero page size has no meaningful slicing.
    let response = client
        .get(format!("{}/questions/paginated?size=0", app.address))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn profile_updates_follow_owner_or_admin() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (wendy_id, wendy_token) = register_and_login(&app, &client, "wendy").await;
    let (_, eve_token) = register_and_login(&app, &client, "eve").await;
    let (_, admin_token) = seed_admin(&app, "root").await;

    // Owner renames their own account.
    let response = client
        .put(format!("{}/users/{}", app.address, wendy_id))
        .bearer_auth(&wendy_token)
        .json(&json!({"username": "wendy2"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["username"], "wendy2");

    // An unrelated user cannot.
    let response = client
        .put(format!("{}/users/{}", app.address, wendy_id))
        .bearer_auth(&eve_token)
        .json(&json!({"username": "hijacked"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 403);

    // Admins can delete accounts; plain users cannot.
    let response = client
        .delete(format!("{}/users/{}", app.address, wendy_id))
        .bearer_auth(&eve_token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 403);

    let response = client
        .delete(format!("{}/users/{}", app.address, wendy_id))
        .bearer_auth(&admin_token)
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn answer_flow_fans_out_to_the_question_aggregate() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "yusuf").await;
    let question_id = create_question(&app, &client, &token, "q").await;

    let response = client
        .post(format!("{}/answers/question/{}", app.address, question_id))
        .bearer_auth(&token)
        .json(&json!({"body": "an answer"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 201);
    let answer: Value = response.json().await.unwrap();
    let answer_id = answer["id"].as_i64().unwrap();

    // Comment on the answer, then read the full aggregate.
    let response = client
        .post(format!("{}/comments/answer/{}", app.address, answer_id))
        .bearer_auth(&token)
        .json(&json!({"content": "nested"}))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 201);

    let response = client
        .get(format!("{}/questions/{}", app.address, question_id))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let answers = body["answers"].as_array().unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["comments"][0]["content"], "nested");
}
