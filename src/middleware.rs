use std::sync::Arc;

use axum::{extract::State, http::Request, middleware::Next, response::Response};

use crate::{auth, model::Principal, AppState};

/// Attaches the request's [`Principal`] as an extension. Anonymous requests
/// pass through; each procedure decides whether it needs a user. A failed
/// lookup is recorded rather than answered here, so the RPC layer can report
/// it in its own envelope.
pub async fn mw_resolve_session<B>(
    State(data): State<Arc<AppState>>,
    mut request: Request<B>,
    next: Next<B>,
) -> Response {
    let principal = match auth::resolve_principal(&data.db, &data.auth, request.headers()).await {
        Ok(Some(user)) => Principal::User(user),
        Ok(None) => Principal::Anonymous,
        Err(e) => Principal::Unresolved(e.to_string()),
    };

    request.extensions_mut().insert(principal);

    next.run(request).await
}
