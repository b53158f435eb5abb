//! A multi-user todo service: batched RPC procedures over owner-scoped
//! SQLite storage, behind an email/password session layer.

use axum::http::HeaderValue;
use sqlx::SqlitePool;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod model;
pub mod route;
pub mod rpc;
pub mod schema;
pub mod store;

#[cfg(test)]
mod test_support;

// Struct representing the application state
pub struct AppState {
    pub db: SqlitePool,
    pub auth: auth::AuthSettings,
    pub allowed_origin: HeaderValue,
}

impl AppState {
    pub fn new(db: SqlitePool, auth: auth::AuthSettings, allowed_origin: HeaderValue) -> Self {
        Self {
            db,
            auth,
            allowed_origin,
        }
    }
}
