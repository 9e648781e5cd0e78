//! Message changelog writer.
//!
//! Audit writes never fail the pipeline: a lost audit row is logged and
//! counted, the send proceeds.

use std::sync::Arc;

use klaxon_core::{ChangeType, MessageId};
use klaxon_db::Db;
use tracing::error;

use crate::metrics::SenderMetrics;

/// Append-only writer over `message_changelog`.
#[derive(Clone)]
pub struct AuditLog {
    db: Db,
    metrics: Arc<SenderMetrics>,
}

impl AuditLog {
    #[must_use]
    pub fn new(db: Db, metrics: Arc<SenderMetrics>) -> Self {
        Self { db, metrics }
    }

    /// Record a change on a message. Errors are swallowed after logging.
    pub async fn message_change(
        &self,
        message_id: MessageId,
        change_type: ChangeType,
        old: &str,
        new: &str,
        description: &str,
    ) {
        if let Err(e) = self
            .db
            .record_message_change(message_id, change_type, old, new, description)
            .await
        {
            self.metrics.incr_task_failure();
            error!(message_id, %change_type, error = %e, "failed to write audit row");
        }
    }
}
