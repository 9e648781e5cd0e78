//! Target contact resolution.
//!
//! The mode for an incident-driven message is decided by a three-stage
//! cascade evaluated in a single statement: per-application preference,
//! then per-user default, then the priority's default mode. Out-of-band
//! messages arrive with a mode already chosen and only need the
//! destination looked up.

use klaxon_core::{ModeId, PriorityId};
use sqlx::FromRow;

use crate::Db;
use crate::error::DbError;

/// A resolved contact: destination plus the mode that yielded it.
#[derive(Debug, Clone, FromRow)]
pub struct ContactRow {
    pub destination: String,
    pub mode: String,
    pub mode_id: ModeId,
}

const CONTACT_BY_PRIORITY_SQL: &str = "\
SELECT `destination`, `mode`.`name` AS `mode`, `mode`.`id` AS `mode_id`
FROM `target`
JOIN `target_contact` ON `target_contact`.`target_id` = `target`.`id`
JOIN `mode` ON `mode`.`id` = `target_contact`.`mode_id`
WHERE `target`.`name` = ? AND `target_contact`.`mode_id` = IFNULL(
    (
        SELECT `target_application_mode`.`mode_id`
        FROM `target_application_mode`
        JOIN `application` ON `target_application_mode`.`application_id` = `application`.`id`
        WHERE `target_application_mode`.`target_id` = `target`.`id`
            AND `application`.`name` = ?
            AND `target_application_mode`.`priority_id` = ?
    ), IFNULL(
        (
            SELECT `target_mode`.`mode_id`
            FROM `target_mode`
            WHERE `target_mode`.`target_id` = `target`.`id`
                AND `target_mode`.`priority_id` = ?
        ), (
            SELECT `mode_id`
            FROM `priority`
            WHERE `id` = ?
        )
    )
)";

impl Db {
    /// Resolve the contact for an incident-driven message through the
    /// application-specific -> user-default -> priority-default cascade.
    ///
    /// `None` means the chosen mode has no `target_contact` row for this
    /// target; the caller falls back to the configured fallback mode.
    pub async fn contact_by_priority(
        &self,
        target: &str,
        application: &str,
        priority_id: PriorityId,
    ) -> Result<Option<ContactRow>, DbError> {
        let row = sqlx::query_as::<_, ContactRow>(CONTACT_BY_PRIORITY_SQL)
            .bind(target)
            .bind(application)
            .bind(priority_id)
            .bind(priority_id)
            .bind(priority_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// Destination for a target under an already-chosen mode id
    /// (out-of-band messages carry their mode from the API).
    pub async fn contact_for_mode_id(
        &self,
        target: &str,
        mode_id: ModeId,
    ) -> Result<Option<String>, DbError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT `destination` FROM `target_contact`
             JOIN `target` ON `target`.`id` = `target_contact`.`target_id`
             WHERE `target`.`name` = ? AND `target_contact`.`mode_id` = ?",
        )
        .bind(target)
        .bind(mode_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(destination,)| destination))
    }

    /// Contact for a target under a mode name (the fallback path).
    pub async fn contact_for_mode_name(
        &self,
        target: &str,
        mode: &str,
    ) -> Result<Option<ContactRow>, DbError> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT `destination`, `mode`.`name` AS `mode`, `mode`.`id` AS `mode_id`
             FROM `target`
             JOIN `target_contact` ON `target_contact`.`target_id` = `target`.`id`
             JOIN `mode` ON `mode`.`id` = `target_contact`.`mode_id`
             WHERE `target`.`name` = ? AND `mode`.`name` = ?",
        )
        .bind(target)
        .bind(mode)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }
}
