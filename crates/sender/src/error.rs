use klaxon_db::DbError;
use klaxon_vendor::VendorError;
use thiserror::Error;

/// Errors surfaced by the sender pipeline.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A pipeline queue's other side is gone; the process is shutting down.
    #[error("queue closed")]
    QueueClosed,
}
