//! PostgreSQL error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PostgresError {
    fn sqlstate(&self) -> Option<String> {
        if let PostgresError::Database(sqlx::Error::Database(db)) = self {
            db.code().map(|c| c.to_string())
        } else {
            None
        }
    }

    /// Insert of an already-present key (SQLSTATE 23505).
    /// The processor treats these as success for ack purposes.
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate().as_deref() == Some("23505")
    }

    /// Referenced parent row is missing (SQLSTATE 23503).
    /// Likes/reposts/list items hitting this go back to the pending buffer.
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate().as_deref() == Some("23503")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failed_error_display() {
        let err = PostgresError::MigrationFailed {
            version: 2,
            name: "add_labels_table".to_string(),
            error: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_labels_table) failed: syntax error"
        );
    }

    #[test]
    fn test_non_database_errors_are_not_violations() {
        let err = PostgresError::Config("missing URL".to_string());
        assert!(!err.is_unique_violation());
        assert!(!err.is_foreign_key_violation());

        let err = PostgresError::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_unique_violation());
        assert!(!err.is_foreign_key_violation());
    }
}
