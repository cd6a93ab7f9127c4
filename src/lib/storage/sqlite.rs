use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::core::{NewTodo, Result, Todo, TodoError, TodoFilter, TodoId, TodoPatch, timestamp_now};
use crate::storage::Storage;

#[cfg(feature = "tracing")]
use tracing::{debug, info, instrument};

const SELECT_TODOS: &str =
    "SELECT id, title, description, completed, created_at, updated_at FROM todos";
const NEWEST_FIRST: &str = "ORDER BY created_at DESC, seq DESC";

pub struct SQLiteStorage {
    pool: SqlitePool,
}

impl SQLiteStorage {
    /// Opens (creating if needed) the database at `url` and migrates it.
    ///
    /// In-memory databases live and die with their connection, so they get a
    /// single connection that is never recycled.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new();
        if is_memory_url(url) {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        } else {
            pool_options = pool_options.max_connections(max_connections.max(1));
        }
        let pool = pool_options.connect_with(options).await?;
        migrate(&pool).await?;
        #[cfg(feature = "tracing")]
        info!(url = %url, "SQLite todo storage ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS todos (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL CHECK (length(title) > 0),
            description TEXT NOT NULL DEFAULT '',
            completed INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS todos_newest_first ON todos (created_at DESC, seq DESC)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[derive(FromRow)]
struct TodoRow {
    id: String,
    title: String,
    description: String,
    completed: bool,
    created_at: i64,
    updated_at: Option<i64>,
}

impl TryFrom<TodoRow> for Todo {
    type Error = TodoError;

    fn try_from(row: TodoRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| TodoError::Storage(format!("corrupt todo id {}: {}", row.id, e)))?;
        let updated_at = row.updated_at.map(from_micros).transpose()?;
        Ok(Todo {
            id: TodoId::from(id),
            title: row.title,
            description: row.description,
            completed: row.completed,
            created_at: from_micros(row.created_at)?,
            updated_at,
        })
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| TodoError::Storage(format!("timestamp out of range: {}", micros)))
}

fn rows_to_todos(rows: Vec<TodoRow>) -> Result<Vec<Todo>> {
    rows.into_iter().map(Todo::try_from).collect()
}

#[async_trait]
impl Storage for SQLiteStorage {
    async fn list(&self, filter: &TodoFilter) -> Result<Vec<Todo>> {
        let rows = match filter {
            TodoFilter::Completed(completed) => {
                sqlx::query_as::<_, TodoRow>(&format!(
                    "{} WHERE completed = ? {}",
                    SELECT_TODOS, NEWEST_FIRST
                ))
                .bind(*completed)
                .fetch_all(&self.pool)
                .await?
            }
            TodoFilter::All | TodoFilter::Search(_) => {
                sqlx::query_as::<_, TodoRow>(&format!("{} {}", SELECT_TODOS, NEWEST_FIRST))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        // SQLite's LIKE and lower() only fold ASCII; search runs here instead.
        let mut todos = rows_to_todos(rows)?;
        if let TodoFilter::Search(_) = filter {
            todos.retain(|todo| filter.matches(todo));
        }
        Ok(todos)
    }

    async fn get(&self, id: TodoId) -> Result<Option<Todo>> {
        let row = sqlx::query_as::<_, TodoRow>(&format!("{} WHERE id = ?", SELECT_TODOS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Todo::try_from).transpose()
    }

    #[cfg_attr(feature = "tracing", instrument(skip(self, input)))]
    async fn create(&self, input: NewTodo) -> Result<Todo> {
        let todo = Todo::create(input, timestamp_now());
        sqlx::query(
            "INSERT INTO todos (id, title, description, completed, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(todo.id.to_string())
        .bind(&todo.title)
        .bind(&todo.description)
        .bind(todo.completed)
        .bind(todo.created_at.timestamp_micros())
        .execute(&self.pool)
        .await?;
        #[cfg(feature = "tracing")]
        debug!(id = %todo.id, "Inserted todo");
        Ok(todo)
    }

    #[cfg_attr(feature = "tracing", instrument(skip(self, patch)))]
    async fn update(&self, id: TodoId, patch: TodoPatch) -> Result<Todo> {
        patch.validate()?;
        // Single statement, so the merge is atomic without an explicit transaction.
        let row = sqlx::query_as::<_, TodoRow>(
            "UPDATE todos SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                completed = COALESCE(?, completed),
                updated_at = MAX(?, created_at)
             WHERE id = ?
             RETURNING id, title, description, completed, created_at, updated_at",
        )
        .bind(patch.title)
        .bind(patch.description)
        .bind(patch.completed)
        .bind(timestamp_now().timestamp_micros())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Todo::try_from(row),
            None => Err(TodoError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: TodoId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM todos WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM todos")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
