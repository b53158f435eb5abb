// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::{num::NonZeroU32, sync::Arc};

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::ServiceExt;

use todo_rpc_server::{auth::AuthSettings, db, route::create_router, AppState};

pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub router: Router,
    pub db: SqlitePool,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub set_cookie: Option<String>,
    pub body: Value,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = db::connect_in_memory().await.unwrap();
        db::migrate(&db).await.unwrap();
        let settings = AuthSettings::new(b"integration-secret", Duration::days(7))
            .with_password_iterations(NonZeroU32::new(1_000).unwrap());
        let state = AppState::new(
            db.clone(),
            settings,
            HeaderValue::from_static("http://localhost:3000"),
        );

        Self {
            router: create_router(Arc::new(state)),
            db,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|value| value.to_str().unwrap().to_string());
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        TestResponse {
            status,
            set_cookie,
            body,
        }
    }

    /// Signs up a fresh user and returns the `Cookie` header value for its session.
    pub async fn sign_up(&self, email: &str) -> String {
        let response = self
            .send(post(
                "/api/auth/sign-up/email",
                None,
                json!({ "email": email, "name": "Test User", "password": PASSWORD }),
            ))
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        cookie_pair(&response)
    }

    pub async fn query(&self, path: &str, cookie: &str, input: Option<Value>) -> TestResponse {
        let uri = match input {
            Some(input) => format!("/trpc/{path}?input={}", encode(&input.to_string())),
            None => format!("/trpc/{path}"),
        };
        self.send(get(&uri, Some(cookie))).await
    }

    pub async fn mutate(&self, path: &str, cookie: &str, input: Value) -> TestResponse {
        self.send(post(&format!("/trpc/{path}"), Some(cookie), input))
            .await
    }

    pub async fn create_todo(&self, cookie: &str, title: &str) -> Value {
        let response = self
            .mutate("todo.create", cookie, json!({ "title": title }))
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        response.body["result"]["data"].clone()
    }

    pub async fn todo_count(&self) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM todo")
            .fetch_one(&self.db)
            .await
            .unwrap();
        count
    }
}

/// The `name=value` part of a `Set-Cookie` header.
pub fn cookie_pair(response: &TestResponse) -> String {
    let set_cookie = response.set_cookie.as_deref().expect("session cookie set");
    set_cookie.split(';').next().unwrap().to_string()
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post(uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn encode(raw: &str) -> String {
    raw.bytes()
        .map(|byte| match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (byte as char).to_string()
            }
            other => format!("%{other:02X}"),
        })
        .collect()
}

pub fn error_code(body: &Value) -> &str {
    body["error"]["data"]["code"].as_str().unwrap_or_default()
}
