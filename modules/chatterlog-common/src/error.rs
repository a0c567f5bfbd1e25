use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatterlogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChatterlogError>;

impl From<sqlx::Error> for ChatterlogError {
    fn from(e: sqlx::Error) -> Self {
        ChatterlogError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ChatterlogError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        ChatterlogError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for ChatterlogError {
    fn from(e: reqwest::Error) -> Self {
        ChatterlogError::Fetch(e.to_string())
    }
}
