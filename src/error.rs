use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Transient storage error: {0}")]
    Transient(String),

    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Schema mismatch: {table}.{column} does not exist")]
    SchemaMismatch { table: String, column: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Only network / 5xx style failures are worth retrying on a later run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }

    /// Maps an HTTP status returned by an S3-compatible provider.
    pub fn from_status(status: u16, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            404 => AppError::NotFound(context),
            401 | 403 => AppError::AccessDenied(format!("{} (HTTP {})", context, status)),
            _ => AppError::Transient(format!("{} (HTTP {})", context, status)),
        }
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::ImageDecode(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
