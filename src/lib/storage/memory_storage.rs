use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::core::{NewTodo, Result, Todo, TodoError, TodoFilter, TodoId, TodoPatch, timestamp_now};

use super::Storage;

#[cfg(feature = "tracing")]
use tracing::debug;

struct Entry {
    seq: u64,
    todo: Todo,
}

#[derive(Default)]
struct Inner {
    todos: HashMap<TodoId, Entry>,
    next_seq: u64,
}

/// Process-local store keyed by id. Each instance owns its records; nothing is
/// shared between instances.
pub struct MemoryStorage {
    inner: RwLock<Inner>,
    clock: fn() -> DateTime<Utc>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(timestamp_now)
    }

    /// Stamps `created_at` and `updated_at` from `clock` instead of the wall
    /// clock.
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list(&self, filter: &TodoFilter) -> Result<Vec<Todo>> {
        let inner = self.inner.read().await;
        let mut entries = inner
            .todos
            .values()
            .filter(|entry| filter.matches(&entry.todo))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| {
            b.todo
                .created_at
                .cmp(&a.todo.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(entries.into_iter().map(|entry| entry.todo.clone()).collect())
    }

    async fn get(&self, id: TodoId) -> Result<Option<Todo>> {
        let inner = self.inner.read().await;
        Ok(inner.todos.get(&id).map(|entry| entry.todo.clone()))
    }

    async fn create(&self, input: NewTodo) -> Result<Todo> {
        let todo = Todo::create(input, (self.clock)());
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.todos.insert(todo.id, Entry { seq, todo: todo.clone() });
        #[cfg(feature = "tracing")]
        debug!(id = %todo.id, seq = seq, "Stored todo in memory");
        Ok(todo)
    }

    async fn update(&self, id: TodoId, patch: TodoPatch) -> Result<Todo> {
        patch.validate()?;
        let mut inner = self.inner.write().await;
        let entry = inner
            .todos
            .get_mut(&id)
            .ok_or_else(|| TodoError::NotFound(id.to_string()))?;
        entry.todo.apply(patch, (self.clock)());
        Ok(entry.todo.clone())
    }

    async fn delete(&self, id: TodoId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.todos.remove(&id).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.todos.len())
    }
}
