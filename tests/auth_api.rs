mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};

use common::{cookie_pair, get, post, TestApp, PASSWORD};

#[tokio::test]
async fn sign_up_opens_a_session() {
    let app = TestApp::new().await;

    let response = app
        .send(post(
            "/api/auth/sign-up/email",
            None,
            json!({ "email": "Alice@Example.com", "name": "Alice", "password": PASSWORD }),
        ))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["user"]["email"], "alice@example.com");
    assert_eq!(response.body["user"]["emailVerified"], false);
    assert!(response.body["token"].is_string());
    let set_cookie = response.set_cookie.as_deref().unwrap();
    assert!(set_cookie.starts_with("todo.session_token="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("Max-Age=604800"));

    let session = app
        .send(get("/api/auth/get-session", Some(&cookie_pair(&response))))
        .await;
    assert_eq!(session.body["user"]["name"], "Alice");
    assert_eq!(session.body["session"]["userId"], response.body["user"]["id"]);
    assert!(session.body["session"].get("token").is_none());
}

#[tokio::test]
async fn get_session_without_cookie_is_null() {
    let app = TestApp::new().await;

    let response = app.send(get("/api/auth/get-session", None)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, Value::Null);
}

#[tokio::test]
async fn duplicate_sign_up_is_rejected() {
    let app = TestApp::new().await;
    app.sign_up("alice@example.com").await;

    let response = app
        .send(post(
            "/api/auth/sign-up/email",
            None,
            json!({ "email": "alice@example.com", "name": "Again", "password": PASSWORD }),
        ))
        .await;

    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.body["code"], "USER_ALREADY_EXISTS");
}

#[tokio::test]
async fn sign_up_validates_its_payload() {
    let app = TestApp::new().await;

    let response = app
        .send(post(
            "/api/auth/sign-up/email",
            None,
            json!({ "email": "not-an-email", "name": "A", "password": "short" }),
        ))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "VALIDATION_ERROR");
    assert_eq!(response.body["issues"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/sign-in/email")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"email\":"))
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "INVALID_BODY");
}

#[tokio::test]
async fn sign_in_checks_the_password() {
    let app = TestApp::new().await;
    app.sign_up("alice@example.com").await;

    let wrong = app
        .send(post(
            "/api/auth/sign-in/email",
            None,
            json!({ "email": "alice@example.com", "password": "wrong password" }),
        ))
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.body["code"], "INVALID_EMAIL_OR_PASSWORD");
    assert!(wrong.set_cookie.is_none());

    let right = app
        .send(post(
            "/api/auth/sign-in/email",
            None,
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        ))
        .await;
    assert_eq!(right.status, StatusCode::OK);
    assert!(right.set_cookie.is_some());
}

#[tokio::test]
async fn bearer_token_authenticates_rpc_calls() {
    let app = TestApp::new().await;
    app.sign_up("alice@example.com").await;
    let signed_in = app
        .send(post(
            "/api/auth/sign-in/email",
            None,
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        ))
        .await;
    let token = signed_in.body["token"].as_str().unwrap();

    let request = Request::builder()
        .method(Method::GET)
        .uri("/trpc/todo.getAll")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["result"]["data"], json!([]));
}

#[tokio::test]
async fn tampered_cookie_is_anonymous() {
    let app = TestApp::new().await;
    let cookie = app.sign_up("alice@example.com").await;
    let (kept, last) = cookie.split_at(cookie.len() - 1);
    let forged = format!("{kept}{}", if last == "A" { "B" } else { "A" });

    let response = app.send(get("/trpc/todo.getAll", Some(&forged))).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sign_out_ends_the_session() {
    let app = TestApp::new().await;
    let cookie = app.sign_up("alice@example.com").await;

    let response = app.send(post("/api/auth/sign-out", Some(&cookie), json!({}))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.set_cookie.unwrap().contains("Max-Age=0"));

    let session = app.send(get("/api/auth/get-session", Some(&cookie))).await;
    assert_eq!(session.body, Value::Null);

    let rpc = app.send(get("/trpc/todo.getAll", Some(&cookie))).await;
    assert_eq!(rpc.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deleting_the_user_cascades_to_todos() {
    let app = TestApp::new().await;
    let alice = app.sign_up("alice@example.com").await;
    let bob = app.sign_up("bob@example.com").await;
    let todo = app.create_todo(&alice, "A").await;
    app.create_todo(&alice, "B").await;
    app.create_todo(&bob, "kept").await;

    let wrong = app
        .send(post(
            "/api/auth/delete-user",
            Some(&alice),
            json!({ "password": "not the password" }),
        ))
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.todo_count().await, 3);

    let response = app
        .send(post(
            "/api/auth/delete-user",
            Some(&alice),
            json!({ "password": PASSWORD }),
        ))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    assert_eq!(app.todo_count().await, 1);
    let gone = app
        .query("todo.getById", &bob, Some(json!({ "id": todo["id"] })))
        .await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    let stale = app.send(get("/trpc/todo.getAll", Some(&alice))).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_user_requires_a_session() {
    let app = TestApp::new().await;

    let response = app
        .send(post(
            "/api/auth/delete-user",
            None,
            json!({ "password": PASSWORD }),
        ))
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}
