//! Error type for the table store.

use thiserror::Error;

/// Errors that can occur during table store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The requested table layout is inconsistent (column/type arity,
    /// primary key naming a column that does not exist, ...).
    #[error("schema error: {0}")]
    Schema(String),

    /// Malformed arguments to an insert, update or query.
    #[error("validation error: {0}")]
    Validation(String),

    /// The table does not exist in the database.
    #[error("table not found: {table_id}")]
    UnknownTable {
        /// The table that was looked up.
        table_id: String,
    },

    /// A statement failed inside the database engine.
    #[error("command failed: {command}: {source}")]
    Command {
        /// The SQL text that failed.
        command: String,
        /// The underlying engine error.
        #[source]
        source: rusqlite::Error,
    },

    /// Database error outside of a specific command (opening, transactions).
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON value could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Wraps an engine error with the command that produced it.
    pub(crate) fn command(command: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Command {
            command: command.into(),
            source,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }
}
