use thiserror::Error;

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to reach the database or build the pool.
    #[error("connection error: {0}")]
    Connection(String),

    /// A statement failed.
    #[error(transparent)]
    Query(#[from] sqlx::Error),

    /// A row decoded into values the domain rejects.
    #[error("invalid row: {0}")]
    InvalidRow(String),
}
