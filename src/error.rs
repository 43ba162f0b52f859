pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown student, course, chapter or item index
    #[error("{0} not found")]
    NotFound(String),
    /// Out-of-sequence access attempt
    #[error("Access denied: {0}")]
    Forbidden(String),
    #[error("Invalid submission: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Certificate issuer or outline provider unavailable
    #[error("External dependency unavailable: {0}")]
    ExternalDependency(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Error::Forbidden(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation(reason.into())
    }

    /// Caller mistakes: retrying the same request will fail the same way.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::Forbidden(_) | Error::Validation(_) | Error::Conflict(_)
        )
    }

    /// Short machine-readable name, used as the `error` field of API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::Validation(_) => "validation",
            Error::Conflict(_) => "conflict",
            Error::ExternalDependency(_) => "external_dependency",
            Error::Database(_) | Error::Migrate(_) | Error::Json(_) | Error::Fatal(_) => "internal",
        }
    }
}
