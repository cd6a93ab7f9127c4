pub mod memory_storage;
#[cfg(feature = "storage")]
pub mod sqlite;

pub use memory_storage::MemoryStorage;

use async_trait::async_trait;
use crate::core::{NewTodo, Result, Todo, TodoFilter, TodoId, TodoPatch};

/// The todo store. Every read hands back owned copies; records are only
/// mutated through these operations.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list(&self, filter: &TodoFilter) -> Result<Vec<Todo>>;
    async fn get(&self, id: TodoId) -> Result<Option<Todo>>;
    async fn create(&self, input: NewTodo) -> Result<Todo>;
    /// Merges `patch` into the record. Fails with `NotFound` for unknown ids.
    async fn update(&self, id: TodoId, patch: TodoPatch) -> Result<Todo>;
    /// Returns whether a record was actually removed.
    async fn delete(&self, id: TodoId) -> Result<bool>;
    async fn count(&self) -> Result<usize>;

    async fn set_completed(&self, id: TodoId, completed: bool) -> Result<Todo> {
        self.update(id, TodoPatch::completed(completed)).await
    }
}
