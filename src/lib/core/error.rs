use thiserror::Error;

#[derive(Error, Debug)]
pub enum TodoError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Todo {0} not found")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, TodoError>;

#[cfg(feature = "storage")]
impl From<sqlx::Error> for TodoError {
    fn from(err: sqlx::Error) -> Self {
        TodoError::Storage(err.to_string())
    }
}
