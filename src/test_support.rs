//! Fixtures shared by the unit tests.

use std::num::NonZeroU32;

use chrono::Duration;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::{
    auth::{self, AuthSettings},
    db,
    model::User,
    schema::NewUser,
};

pub(crate) const PASSWORD: &str = "password123";

pub(crate) fn settings() -> AuthSettings {
    AuthSettings::new(b"unit-test-secret", Duration::days(7))
        .with_password_iterations(NonZeroU32::new(1_000).unwrap())
}

pub(crate) async fn pool() -> SqlitePool {
    let pool = db::connect_in_memory().await.unwrap();
    db::migrate(&pool).await.unwrap();
    pool
}

/// A store in a temporary file, so that several connections share it. The
/// directory is removed when the returned guard drops.
pub(crate) async fn file_pool(connections: u32) -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("todo.db").display());
    let pool = db::connect(&url, connections).await.unwrap();
    db::migrate(&pool).await.unwrap();
    (dir, pool)
}

pub(crate) async fn user(db: &SqlitePool, email: &str) -> User {
    auth::create_user(
        db,
        &settings(),
        NewUser {
            email: email.to_string(),
            name: "Test User".to_string(),
            password: PASSWORD.to_string(),
        },
    )
    .await
    .unwrap()
}
