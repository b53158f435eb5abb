use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    auth::{self, AuthSettings, SessionMeta},
    error::AuthError,
    model::{HealthStatus, Principal, Session, User},
    rpc::{self, ProcedureKind, RpcParams},
    schema::{
        parse_input, Credentials, DeleteUserSchema, SignInSchema, SignUpSchema, Validate,
    },
    AppState,
};

// Handler for the health checker route
pub async fn health_checker_handler() -> impl IntoResponse {
    Json(HealthStatus::now())
}

// Handler for RPC queries (GET)
pub async fn rpc_query(
    State(data): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(paths): Path<String>,
    Query(params): Query<RpcParams>,
) -> Response {
    rpc::handle(
        &data,
        &principal,
        ProcedureKind::Query,
        &paths,
        params.is_batch(),
        params.input.as_deref(),
    )
    .await
}

// Handler for RPC mutations (POST); the body carries the input
pub async fn rpc_mutation(
    State(data): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(paths): Path<String>,
    Query(params): Query<RpcParams>,
    body: String,
) -> Response {
    rpc::handle(
        &data,
        &principal,
        ProcedureKind::Mutation,
        &paths,
        params.is_batch(),
        Some(body.as_str()),
    )
    .await
}

fn read_json<S>(body: &str) -> Result<S::Output, AuthError>
where
    S: DeserializeOwned + Validate,
{
    let value: Value =
        serde_json::from_str(body).map_err(|e| AuthError::MalformedBody(e.to_string()))?;
    Ok(parse_input::<S>(Some(value))?)
}

fn signed_in(
    settings: &AuthSettings,
    headers: &HeaderMap,
    session: &Session,
    user: &User,
) -> Response {
    let jar = settings
        .cookie_jar(headers)
        .add(auth::session_cookie(settings, &session.token));
    let body = json!({ "token": session.token, "user": user });

    (StatusCode::OK, jar, Json(body)).into_response()
}

fn signed_out(settings: &AuthSettings, headers: &HeaderMap) -> Response {
    let jar = settings
        .cookie_jar(headers)
        .remove(auth::expired_session_cookie(settings));

    (StatusCode::OK, jar, Json(json!({ "success": true }))).into_response()
}

async fn current_session(
    data: &AppState,
    headers: &HeaderMap,
) -> Result<Option<(Session, User)>, AuthError> {
    match auth::session_token(&data.auth, headers) {
        Some(token) => auth::find_session(&data.db, &token).await,
        None => Ok(None),
    }
}

pub async fn sign_up(
    State(data): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AuthError> {
    let new_user = read_json::<SignUpSchema>(&body)?;
    let user = auth::create_user(&data.db, &data.auth, new_user).await?;
    let session = auth::create_session(
        &data.db,
        &data.auth,
        &user.id,
        SessionMeta::from_headers(&headers),
    )
    .await?;

    Ok(signed_in(&data.auth, &headers, &session, &user))
}

pub async fn sign_in(
    State(data): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AuthError> {
    let credentials = read_json::<SignInSchema>(&body)?;
    let user = auth::verify_credentials(&data.db, &data.auth, &credentials).await?;
    let session = auth::create_session(
        &data.db,
        &data.auth,
        &user.id,
        SessionMeta::from_headers(&headers),
    )
    .await?;

    tracing::info!(user_id = %user.id, "User signed in");
    Ok(signed_in(&data.auth, &headers, &session, &user))
}

pub async fn sign_out(
    State(data): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    if let Some(token) = auth::session_token(&data.auth, &headers) {
        auth::delete_session(&data.db, &token).await?;
    }
    Ok(signed_out(&data.auth, &headers))
}

pub async fn get_session(
    State(data): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AuthError> {
    let body = match current_session(&data, &headers).await? {
        Some((session, user)) => json!({ "session": session, "user": user }),
        None => Value::Null,
    };
    Ok(Json(body))
}

pub async fn delete_user(
    State(data): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AuthError> {
    let (_, user) = current_session(&data, &headers)
        .await?
        .ok_or(AuthError::Unauthenticated)?;
    let password = read_json::<DeleteUserSchema>(&body)?;
    let credentials = Credentials {
        email: user.email.clone(),
        password,
    };
    auth::verify_credentials(&data.db, &data.auth, &credentials).await?;
    auth::delete_user(&data.db, &user.id).await?;

    Ok(signed_out(&data.auth, &headers))
}
