use std::sync::Arc;

use axum::Server;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use todo_rpc_server::{config::Config, db, route::create_router, AppState};

// Entry point of the application
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;

    // Connect to the database and bring the schema up to date
    let pool = db::connect(&config.database_url, config.max_connections).await?;
    db::migrate(&pool).await?;

    // Create an Arc-wrapped instance of the application state
    let app_state = Arc::new(AppState::new(
        pool,
        config.auth_settings()?,
        config.allowed_origin()?,
    ));
    let app = create_router(app_state);

    // Specify the address and port to run the server on
    let addr = config.socket_addr()?;
    let server = Server::try_bind(&addr)?;

    info!("Server ready at http://{addr}");
    info!("RPC endpoint: http://{addr}/trpc");
    info!("Auth endpoint: http://{addr}/api/auth");

    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
