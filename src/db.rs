use std::str::FromStr;

use sqlx::{
    migrate::{MigrateDatabase, MigrateError},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use tracing::info;

/// Opens the store, creating the database file when it does not exist yet.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    // Check if the database exists, if not, create it
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!(database_url, "Creating database");
        Sqlite::create_database(database_url).await?;
    }

    let options = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    info!("Connection to the database is successful");
    Ok(pool)
}

/// A private in-memory store on a single, never-recycled connection.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), MigrateError> {
    sqlx::migrate!().run(pool).await
}
