use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{Result, TodoError};

/// Current time at microsecond precision, the resolution the SQLite store
/// persists. Both stores stamp records through this.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Opaque todo identifier. Assigned by the store, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoId(Uuid);

impl TodoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for TodoId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for TodoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TodoId {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TodoError::NotFound(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: TodoId,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Todo {
    /// Builds a fresh record from validated input. Id and `created_at` are
    /// stamped here so every store assigns them the same way.
    pub fn create(input: NewTodo, now: DateTime<Utc>) -> Self {
        Self {
            id: TodoId::new(),
            title: input.title,
            description: input.description,
            completed: false,
            created_at: now,
            updated_at: None,
        }
    }

    /// Merges the present fields of `patch` and stamps `updated_at`, which
    /// never precedes `created_at`.
    pub fn apply(&mut self, patch: TodoPatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        self.updated_at = Some(now.max(self.created_at));
    }
}

/// Create input. Only constructible through [`NewTodo::new`], so a store never
/// sees an empty title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
    title: String,
    description: String,
}

impl NewTodo {
    pub fn new(title: Option<String>, description: Option<String>) -> Result<Self> {
        let title = title.unwrap_or_default();
        validate_title(&title)?;
        Ok(Self {
            title,
            description: description.unwrap_or_default(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Partial update. `None` leaves the field untouched; there is no way to
/// express "unset", so clearing a description means sending `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TodoPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
}

impl TodoPatch {
    pub fn completed(value: bool) -> Self {
        Self {
            completed: Some(value),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.title {
            Some(title) => validate_title(title),
            None => Ok(()),
        }
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(TodoError::Validation("Title is required".into()));
    }
    Ok(())
}

/// Read view over the store. Completion filtering and search are exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TodoFilter {
    #[default]
    All,
    Completed(bool),
    Search(String),
}

impl TodoFilter {
    pub fn search(term: impl Into<String>) -> Self {
        TodoFilter::Search(term.into())
    }

    pub fn matches(&self, todo: &Todo) -> bool {
        match self {
            TodoFilter::All => true,
            TodoFilter::Completed(completed) => todo.completed == *completed,
            TodoFilter::Search(term) => {
                let term = term.to_lowercase();
                todo.title.to_lowercase().contains(&term)
                    || todo.description.to_lowercase().contains(&term)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn todo(title: &str, description: &str) -> Todo {
        let input = NewTodo::new(Some(title.into()), Some(description.into())).unwrap();
        Todo::create(input, Utc::now())
    }

    #[test]
    fn new_todo_defaults_description() {
        let input = NewTodo::new(Some("Buy milk".into()), None).unwrap();
        assert_eq!(input.title(), "Buy milk");
        assert_eq!(input.description(), "");
    }

    #[test]
    fn new_todo_rejects_missing_or_blank_title() {
        assert!(matches!(NewTodo::new(None, None), Err(TodoError::Validation(_))));
        assert!(matches!(
            NewTodo::new(Some(String::new()), Some("desc".into())),
            Err(TodoError::Validation(_))
        ));
        assert!(matches!(
            NewTodo::new(Some("   ".into()), None),
            Err(TodoError::Validation(_))
        ));
    }

    #[test]
    fn created_todo_is_incomplete_without_update_stamp() {
        let t = todo("Buy milk", "");
        assert!(!t.completed);
        assert!(t.updated_at.is_none());
    }

    #[test]
    fn apply_only_touches_present_fields() {
        let mut t = todo("Buy milk", "2 liters");
        let created_at = t.created_at;
        t.apply(TodoPatch::completed(true), created_at + Duration::seconds(5));
        assert!(t.completed);
        assert_eq!(t.title, "Buy milk");
        assert_eq!(t.description, "2 liters");
        assert_eq!(t.created_at, created_at);
        assert_eq!(t.updated_at, Some(created_at + Duration::seconds(5)));
    }

    #[test]
    fn apply_clamps_update_stamp_to_creation() {
        let mut t = todo("Buy milk", "");
        let created_at = t.created_at;
        t.apply(TodoPatch::default(), created_at - Duration::seconds(30));
        assert_eq!(t.updated_at, Some(created_at));
    }

    #[test]
    fn patch_rejects_blank_title() {
        let patch = TodoPatch {
            title: Some(String::new()),
            ..TodoPatch::default()
        };
        assert!(matches!(patch.validate(), Err(TodoError::Validation(_))));
        assert!(TodoPatch::default().validate().is_ok());
    }

    #[test]
    fn patch_fields_are_optional_in_json() {
        let patch: TodoPatch = serde_json::from_str(r#"{"description":""}"#).unwrap();
        assert_eq!(patch.description.as_deref(), Some(""));
        assert!(patch.title.is_none());
        assert!(patch.completed.is_none());
    }

    #[test]
    fn search_is_case_insensitive_over_title_and_description() {
        let filter = TodoFilter::search("MILK");
        assert!(filter.matches(&todo("Buy Milk", "")));
        assert!(filter.matches(&todo("Groceries", "oat milk")));
        assert!(!filter.matches(&todo("Walk dog", "")));
        assert!(TodoFilter::search("").matches(&todo("Walk dog", "")));
    }

    #[test]
    fn todo_serializes_camel_case_and_omits_missing_update() {
        let t = todo("Walk dog", "");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["title"], "Walk dog");
        assert_eq!(json["completed"], false);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_none());
        assert_eq!(json["id"], t.id.to_string());
    }

    #[test]
    fn parsing_a_bad_id_reports_not_found() {
        assert!(matches!("nope".parse::<TodoId>(), Err(TodoError::NotFound(_))));
        let id = TodoId::new();
        assert_eq!(id.to_string().parse::<TodoId>().unwrap(), id);
    }
}
