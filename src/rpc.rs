//! Batched procedure calls over a single HTTP endpoint.
//!
//! `GET /trpc/health,todo.getAll?batch=1&input={"0":null,"1":null}` runs two
//! queries; `POST /trpc/todo.create?batch=1` with body `{"0":{"title":"A"}}`
//! runs one mutation. Without `batch=1` the path names exactly one procedure
//! and the input is passed bare.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    model::{CurrentUser, HealthStatus, Principal},
    schema::{parse_input, CreateTodoSchema, TodoIdSchema, UpdateTodoSchema},
    store, AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Query,
    Mutation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoProcedure {
    GetAll,
    GetById,
    Create,
    Update,
    Delete,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    Health,
    Todo(TodoProcedure),
}

impl Procedure {
    pub const ALL: [Procedure; 7] = [
        Procedure::Health,
        Procedure::Todo(TodoProcedure::GetAll),
        Procedure::Todo(TodoProcedure::GetById),
        Procedure::Todo(TodoProcedure::Create),
        Procedure::Todo(TodoProcedure::Update),
        Procedure::Todo(TodoProcedure::Delete),
        Procedure::Todo(TodoProcedure::Toggle),
    ];

    pub fn path(self) -> &'static str {
        match self {
            Procedure::Health => "health",
            Procedure::Todo(TodoProcedure::GetAll) => "todo.getAll",
            Procedure::Todo(TodoProcedure::GetById) => "todo.getById",
            Procedure::Todo(TodoProcedure::Create) => "todo.create",
            Procedure::Todo(TodoProcedure::Update) => "todo.update",
            Procedure::Todo(TodoProcedure::Delete) => "todo.delete",
            Procedure::Todo(TodoProcedure::Toggle) => "todo.toggle",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|procedure| procedure.path() == path)
    }

    pub fn kind(self) -> ProcedureKind {
        match self {
            Procedure::Health
            | Procedure::Todo(TodoProcedure::GetAll)
            | Procedure::Todo(TodoProcedure::GetById) => ProcedureKind::Query,
            Procedure::Todo(_) => ProcedureKind::Mutation,
        }
    }

    pub fn access(self) -> Access {
        match self {
            Procedure::Health => Access::Public,
            Procedure::Todo(_) => Access::Protected,
        }
    }
}

/// Query string of the RPC endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct RpcParams {
    pub batch: Option<String>,
    pub input: Option<String>,
}

impl RpcParams {
    pub fn is_batch(&self) -> bool {
        matches!(self.batch.as_deref(), Some("1" | "true"))
    }
}

/// Runs one procedure. Authentication is checked before the input is looked at.
pub async fn call(
    state: &AppState,
    principal: Option<&CurrentUser>,
    procedure: Procedure,
    input: Option<Value>,
) -> Result<Value, AppError> {
    let user = match procedure.access() {
        Access::Public => principal,
        Access::Protected => Some(principal.ok_or(AppError::Unauthenticated)?),
    };

    match (procedure, user) {
        (Procedure::Health, _) => to_data(HealthStatus::now()),
        (Procedure::Todo(op), Some(user)) => call_todo(&state.db, &user.id, op, input).await,
        (Procedure::Todo(_), None) => Err(AppError::Unauthenticated),
    }
}

async fn call_todo(
    db: &SqlitePool,
    owner: &str,
    op: TodoProcedure,
    input: Option<Value>,
) -> Result<Value, AppError> {
    match op {
        TodoProcedure::GetAll => to_data(store::list_todos(db, owner).await?),
        TodoProcedure::GetById => {
            let id = parse_input::<TodoIdSchema>(input)?;
            to_data(store::get_todo(db, owner, id).await?)
        }
        TodoProcedure::Create => {
            let new = parse_input::<CreateTodoSchema>(input)?;
            to_data(store::create_todo(db, owner, new).await?)
        }
        TodoProcedure::Update => {
            let update = parse_input::<UpdateTodoSchema>(input)?;
            to_data(store::update_todo(db, owner, update).await?)
        }
        TodoProcedure::Delete => {
            let id = parse_input::<TodoIdSchema>(input)?;
            store::delete_todo(db, owner, id).await?;
            Ok(json!({ "success": true }))
        }
        TodoProcedure::Toggle => {
            let id = parse_input::<TodoIdSchema>(input)?;
            to_data(store::toggle_todo(db, owner, id).await?)
        }
    }
}

fn to_data<T: Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))
}

/// One entry of a (possibly batched) request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub path: String,
    pub input: Option<Value>,
}

/// Splits the path list and pairs every procedure with its input.
pub fn parse_calls(
    paths: &str,
    batch: bool,
    raw_input: Option<&str>,
) -> Result<Vec<RpcCall>, String> {
    let raw_input = raw_input.filter(|raw| !raw.trim().is_empty());
    let input = raw_input
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|e| format!("input is not valid JSON: {e}"))?;

    if !batch {
        return Ok(vec![RpcCall {
            path: paths.to_string(),
            input,
        }]);
    }

    let mut inputs = match input {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err("batch input must be an object keyed by call index".to_string()),
    };
    Ok(paths
        .split(',')
        .enumerate()
        .map(|(index, path)| RpcCall {
            path: path.to_string(),
            input: inputs.remove(&index.to_string()),
        })
        .collect())
}

/// A single call's outcome, already shaped for the wire.
struct Outcome {
    status: StatusCode,
    body: Value,
}

impl Outcome {
    fn success(data: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({ "result": { "data": data } }),
        }
    }

    fn failure(path: &str, error: &AppError) -> Self {
        if error.is_server_fault() {
            tracing::error!(path, error = %error, "RPC call failed");
        } else {
            tracing::debug!(path, error = %error, "RPC call rejected");
        }

        let code = error.code();
        let mut data = json!({
            "code": code.as_str(),
            "httpStatus": code.status().as_u16(),
            "path": path,
        });
        if let AppError::Validation(validation) = error {
            data["issues"] = json!(validation.issues);
        }

        Self {
            status: code.status(),
            body: json!({
                "error": {
                    "message": error.public_message(),
                    "code": code.json_rpc_code(),
                    "data": data,
                }
            }),
        }
    }
}

async fn run_call(
    state: &AppState,
    principal: Option<&CurrentUser>,
    kind: ProcedureKind,
    rpc_call: RpcCall,
) -> Outcome {
    let result = match Procedure::from_path(&rpc_call.path) {
        None => Err(AppError::ProcedureNotFound(rpc_call.path.clone())),
        Some(procedure) if procedure.kind() != kind => {
            Err(AppError::MethodNotSupported(rpc_call.path.clone()))
        }
        Some(procedure) => call(state, principal, procedure, rpc_call.input).await,
    };

    match result {
        Ok(data) => Outcome::success(data),
        Err(error) => Outcome::failure(&rpc_call.path, &error),
    }
}

fn render(batch: bool, outcomes: Vec<Outcome>) -> Response {
    if !batch {
        if let Some(outcome) = outcomes.into_iter().next() {
            return (outcome.status, Json(outcome.body)).into_response();
        }
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let status = match outcomes.first() {
        Some(first) if outcomes.iter().all(|o| o.status == first.status) => first.status,
        Some(_) => StatusCode::MULTI_STATUS,
        None => StatusCode::OK,
    };
    let body: Vec<Value> = outcomes.into_iter().map(|o| o.body).collect();
    (status, Json(body)).into_response()
}

fn fail_all(paths: &str, batch: bool, error: AppError) -> Response {
    let outcomes = paths
        .split(',')
        .map(|path| Outcome::failure(path, &error))
        .collect();
    render(batch, outcomes)
}

/// Serves one HTTP request against the RPC endpoint. Calls in a batch run in
/// order and fail independently. When the caller's session could not be
/// looked up, every call fails with an internal error.
pub async fn handle(
    state: &AppState,
    principal: &Principal,
    kind: ProcedureKind,
    paths: &str,
    batch: bool,
    raw_input: Option<&str>,
) -> Response {
    if let Principal::Unresolved(cause) = principal {
        return fail_all(paths, batch, AppError::Internal(cause.clone()));
    }
    let calls = match parse_calls(paths, batch, raw_input) {
        Ok(calls) => calls,
        Err(message) => return fail_all(paths, batch, AppError::Parse(message)),
    };

    let mut outcomes = Vec::with_capacity(calls.len());
    for rpc_call in calls {
        outcomes.push(run_call(state, principal.user(), kind, rpc_call).await);
    }
    render(batch, outcomes)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support;

    #[rstest]
    #[case("health", ProcedureKind::Query, Access::Public)]
    #[case("todo.getAll", ProcedureKind::Query, Access::Protected)]
    #[case("todo.getById", ProcedureKind::Query, Access::Protected)]
    #[case("todo.create", ProcedureKind::Mutation, Access::Protected)]
    #[case("todo.update", ProcedureKind::Mutation, Access::Protected)]
    #[case("todo.delete", ProcedureKind::Mutation, Access::Protected)]
    #[case("todo.toggle", ProcedureKind::Mutation, Access::Protected)]
    fn procedure_table(#[case] path: &str, #[case] kind: ProcedureKind, #[case] access: Access) {
        let procedure = Procedure::from_path(path).unwrap();
        assert_eq!(procedure.path(), path);
        assert_eq!(procedure.kind(), kind);
        assert_eq!(procedure.access(), access);
    }

    #[test]
    fn unknown_paths_do_not_resolve() {
        assert_eq!(Procedure::from_path("todo.nuke"), None);
        assert_eq!(Procedure::from_path("todo"), None);
    }

    #[test]
    fn batch_inputs_are_matched_by_index() {
        let calls = parse_calls(
            "todo.create,todo.toggle,todo.getAll",
            true,
            Some(r#"{"0":{"title":"A"},"1":{"id":"x"}}"#),
        )
        .unwrap();

        assert_eq!(
            calls,
            vec![
                RpcCall {
                    path: "todo.create".into(),
                    input: Some(json!({ "title": "A" })),
                },
                RpcCall {
                    path: "todo.toggle".into(),
                    input: Some(json!({ "id": "x" })),
                },
                RpcCall {
                    path: "todo.getAll".into(),
                    input: None,
                },
            ]
        );
    }

    #[test]
    fn single_call_takes_the_bare_input() {
        let calls = parse_calls("todo.getById", false, Some(r#"{"id":"x"}"#)).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, Some(json!({ "id": "x" })));

        let calls = parse_calls("health", false, Some("")).unwrap();
        assert_eq!(calls[0].input, None);
    }

    #[rstest]
    #[case("{not json")]
    #[case("[1, 2]")]
    fn malformed_batch_input_is_rejected(#[case] raw: &str) {
        assert!(parse_calls("health", true, Some(raw)).is_err());
    }

    #[tokio::test]
    async fn protected_procedures_require_a_principal_before_validation() {
        let state = AppState::new(
            test_support::pool().await,
            test_support::settings(),
            axum::http::HeaderValue::from_static("http://localhost:3000"),
        );

        let result = call(
            &state,
            None,
            Procedure::Todo(TodoProcedure::Update),
            Some(json!({ "id": "not-a-uuid", "title": "" })),
        )
        .await;

        assert!(matches!(result, Err(AppError::Unauthenticated)));
    }

    #[tokio::test]
    async fn failed_session_lookup_fails_every_call_in_the_batch() {
        let state = AppState::new(
            test_support::pool().await,
            test_support::settings(),
            axum::http::HeaderValue::from_static("http://localhost:3000"),
        );
        let principal = Principal::Unresolved("no such table: session".to_string());

        let response = handle(
            &state,
            &principal,
            ProcedureKind::Query,
            "health,todo.getAll",
            true,
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let results = body.as_array().unwrap();
        assert_eq!(results.len(), 2);
        for (result, path) in results.iter().zip(["health", "todo.getAll"]) {
            assert_eq!(result["error"]["data"]["code"], "INTERNAL_SERVER_ERROR");
            assert_eq!(result["error"]["data"]["path"], path);
            assert_eq!(result["error"]["message"], "Internal server error");
        }
    }

    #[tokio::test]
    async fn health_needs_no_principal() {
        let state = AppState::new(
            test_support::pool().await,
            test_support::settings(),
            axum::http::HeaderValue::from_static("http://localhost:3000"),
        );

        let data = call(&state, None, Procedure::Health, None).await.unwrap();
        assert_eq!(data["status"], "ok");
        assert!(data["timestamp"].is_string());
    }
}
