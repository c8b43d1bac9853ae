#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

impl DatabaseError {
    pub fn corrupt(table: &'static str, message: impl Into<String>) -> Self {
        DatabaseError::Corrupt {
            table,
            message: message.into(),
        }
    }
}

/// Postgres SQLSTATE for unique_violation.
#[cfg(feature = "database")]
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

#[cfg(feature = "database")]
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}
