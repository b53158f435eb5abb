use std::sync::Arc;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{error::auth_panic_response, handler::*, middleware::mw_resolve_session, AppState};

/// Email/password routes, mounted under `/api/auth`.
fn auth_router() -> Router<Arc<AppState>> {
    with_panic_guard(
        Router::new()
            .route("/sign-up/email", post(sign_up))
            .route("/sign-in/email", post(sign_in))
            .route("/sign-out", post(sign_out))
            .route("/get-session", get(get_session))
            .route("/delete-user", post(delete_user)),
    )
}

// A panic in any auth route becomes the generic AUTH_FAILURE response
fn with_panic_guard<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(CatchPanicLayer::custom(auth_panic_response))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Configure CORS settings for the application
    let cors = CorsLayer::new()
        .allow_origin(app_state.allowed_origin.clone())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_credentials(true)
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE]);

    Router::new()
        .route("/trpc/:procedures", get(rpc_query).post(rpc_mutation))
        .route_layer(from_fn_with_state(app_state.clone(), mw_resolve_session))
        .nest("/api/auth", auth_router())
        .route("/health", get(health_checker_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
