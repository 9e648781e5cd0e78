//! The append-only message audit log.

use klaxon_core::{ChangeType, MessageId};
use tracing::debug;

use crate::Db;
use crate::error::DbError;

impl Db {
    /// Append one audit row for a message change.
    pub async fn record_message_change(
        &self,
        message_id: MessageId,
        change_type: ChangeType,
        old: &str,
        new: &str,
        description: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO `message_changelog`
                (`date`, `message_id`, `change_type`, `old`, `new`, `description`)
             VALUES (NOW(), ?, ?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(change_type.as_str())
        .bind(old)
        .bind(new)
        .bind(description)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Delete audit rows older than the three-month retention window.
    pub async fn prune_changelog(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM `message_changelog`
             WHERE `date` < DATE_SUB(CURDATE(), INTERVAL 3 MONTH)",
        )
        .execute(self.pool())
        .await?;
        debug!(pruned = result.rows_affected(), "changelog prune complete");
        Ok(result.rows_affected())
    }
}
