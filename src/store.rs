//! Owner-scoped persistence for todos.
//!
//! Every write path filters on `id AND user_id`; a row that exists but
//! belongs to someone else is indistinguishable from a missing one.

use sqlx::{query, query_as, QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    error::AppError,
    model::{now_millis, Todo, TodoRow},
    schema::{NewTodo, UpdateTodo},
};

const TODO_COLUMNS: &str = "id, title, description, completed, user_id, created_at, updated_at";

// Keeps `updated_at` strictly increasing even within one millisecond
const BUMP_UPDATED_AT: &str = "updated_at = MAX(?, updated_at + 1)";

fn into_todo(row: TodoRow) -> Result<Todo, AppError> {
    Ok(Todo::try_from(row)?)
}

/// All todos owned by `owner`, newest first.
pub async fn list_todos(db: &SqlitePool, owner: &str) -> Result<Vec<Todo>, AppError> {
    let rows = query_as::<_, TodoRow>(&format!(
        "SELECT {TODO_COLUMNS} FROM todo WHERE user_id = ? ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(owner)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(into_todo).collect()
}

pub async fn get_todo(db: &SqlitePool, owner: &str, id: Uuid) -> Result<Todo, AppError> {
    let row = query_as::<_, TodoRow>(&format!(
        "SELECT {TODO_COLUMNS} FROM todo WHERE id = ? AND user_id = ?"
    ))
    .bind(id.to_string())
    .bind(owner)
    .fetch_optional(db)
    .await?;

    row.ok_or(AppError::NotFound).and_then(into_todo)
}

pub async fn create_todo(db: &SqlitePool, owner: &str, new: NewTodo) -> Result<Todo, AppError> {
    let now = now_millis();
    let row = query_as::<_, TodoRow>(&format!(
        "INSERT INTO todo (id, title, description, completed, user_id, created_at, updated_at) \
         VALUES (?, ?, ?, 0, ?, ?, ?) RETURNING {TODO_COLUMNS}"
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(new.title)
    .bind(new.description)
    .bind(owner)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;

    into_todo(row)
}

/// Applies only the fields present in the patch and refreshes `updated_at`.
pub async fn update_todo(
    db: &SqlitePool,
    owner: &str,
    update: UpdateTodo,
) -> Result<Todo, AppError> {
    let UpdateTodo { id, patch } = update;

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE todo SET updated_at = MAX(");
    builder.push_bind(now_millis()).push(", updated_at + 1)");
    if let Some(title) = patch.title {
        builder.push(", title = ").push_bind(title);
    }
    if let Some(description) = patch.description {
        builder.push(", description = ").push_bind(description);
    }
    if let Some(completed) = patch.completed {
        builder.push(", completed = ").push_bind(completed);
    }
    builder
        .push(" WHERE id = ")
        .push_bind(id.to_string())
        .push(" AND user_id = ")
        .push_bind(owner.to_string())
        .push(" RETURNING ")
        .push(TODO_COLUMNS);

    let row = builder
        .build_query_as::<TodoRow>()
        .fetch_optional(db)
        .await?;

    row.ok_or(AppError::NotFound).and_then(into_todo)
}

/// Flips `completed` in one guarded statement, so concurrent toggles never
/// read a stale value.
pub async fn toggle_todo(db: &SqlitePool, owner: &str, id: Uuid) -> Result<Todo, AppError> {
    let row = query_as::<_, TodoRow>(&format!(
        "UPDATE todo SET completed = NOT completed, {BUMP_UPDATED_AT} \
         WHERE id = ? AND user_id = ? RETURNING {TODO_COLUMNS}"
    ))
    .bind(now_millis())
    .bind(id.to_string())
    .bind(owner)
    .fetch_optional(db)
    .await?;

    row.ok_or(AppError::NotFound).and_then(into_todo)
}

pub async fn delete_todo(db: &SqlitePool, owner: &str, id: Uuid) -> Result<(), AppError> {
    let rows_affected = query("DELETE FROM todo WHERE id = ? AND user_id = ?")
        .bind(id.to_string())
        .bind(owner)
        .execute(db)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}
