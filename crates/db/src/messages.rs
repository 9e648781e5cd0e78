//! Message lifecycle: polling unsent rows, marking sends, mode updates.

use std::collections::HashSet;

use klaxon_core::{IncidentId, MessageId, MessagePayload, PlanId, PriorityId};
use sqlx::{FromRow, QueryBuilder};
use tracing::warn;

use crate::Db;
use crate::error::DbError;

/// An unsent `message` row joined with the names the pipeline keys on.
#[derive(Debug, Clone, FromRow)]
pub struct UnsentMessageRow {
    pub message_id: MessageId,
    pub body: String,
    pub target: String,
    pub priority: String,
    pub priority_id: PriorityId,
    pub application: String,
    pub plan: Option<String>,
    pub plan_id: Option<PlanId>,
    pub incident_id: Option<IncidentId>,
    pub context: Option<String>,
    pub template: Option<String>,
}

impl UnsentMessageRow {
    /// Convert into the in-flight payload form.
    ///
    /// A context that fails to parse is dropped with a warning rather than
    /// wedging the message; the renderer degrades to its error message when
    /// the template needs variables that are gone.
    #[must_use]
    pub fn into_payload(self) -> MessagePayload {
        let context = self.context.and_then(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| {
                    warn!(message_id = self.message_id, error = %e, "unparseable message context");
                })
                .ok()
        });
        MessagePayload {
            message_id: Some(self.message_id),
            incident_id: self.incident_id,
            plan_id: self.plan_id,
            plan: self.plan,
            application: self.application,
            target: self.target,
            priority: self.priority,
            priority_id: self.priority_id,
            body: self.body,
            template: self.template,
            context,
            ..MessagePayload::default()
        }
    }
}

const UNSENT_MESSAGES_SQL: &str = "\
SELECT
    `message`.`id` AS `message_id`,
    `message`.`body` AS `body`,
    `target`.`name` AS `target`,
    `priority`.`name` AS `priority`,
    `priority`.`id` AS `priority_id`,
    `application`.`name` AS `application`,
    `plan`.`name` AS `plan`,
    `plan`.`id` AS `plan_id`,
    `incident`.`id` AS `incident_id`,
    `incident`.`context` AS `context`,
    `plan_notification`.`template` AS `template`
FROM `message`
JOIN `application` ON `message`.`application_id` = `application`.`id`
JOIN `priority` ON `message`.`priority_id` = `priority`.`id`
JOIN `target` ON `message`.`target_id` = `target`.`id`
LEFT OUTER JOIN `plan` ON `message`.`plan_id` = `plan`.`id`
LEFT OUTER JOIN `plan_notification` ON `message`.`plan_notification_id` = `plan_notification`.`id`
LEFT OUTER JOIN `incident` ON `message`.`incident_id` = `incident`.`id`
WHERE `message`.`active` = 1";

impl Db {
    /// Unsent messages, excluding ids currently buffered in the aggregation
    /// engine so they are not intook twice.
    pub async fn unsent_messages(
        &self,
        exclude: &[MessageId],
    ) -> Result<Vec<UnsentMessageRow>, DbError> {
        if exclude.is_empty() {
            let rows = sqlx::query_as::<_, UnsentMessageRow>(UNSENT_MESSAGES_SQL)
                .fetch_all(self.pool())
                .await?;
            return Ok(rows);
        }

        let mut builder = QueryBuilder::new(UNSENT_MESSAGES_SQL);
        builder.push(" AND `message`.`id` NOT IN (");
        let mut separated = builder.separated(", ");
        for id in exclude {
            separated.push_bind(id);
        }
        builder.push(")");
        let rows = builder
            .build_query_as::<UnsentMessageRow>()
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Which of the given message ids are still active. A claimed incident
    /// deactivates its messages between buffering and batch flush.
    pub async fn active_message_ids(
        &self,
        ids: &[MessageId],
    ) -> Result<HashSet<MessageId>, DbError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut builder =
            QueryBuilder::new("SELECT `id` FROM `message` WHERE `active` = 1 AND `id` IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        builder.push(")");
        let rows: Vec<(MessageId,)> = builder
            .build_query_as()
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Record a successful single send on the message row.
    pub async fn mark_message_sent(&self, message: &MessagePayload) -> Result<(), DbError> {
        let Some(message_id) = message.message_id else {
            return Err(DbError::InvalidRow(
                "cannot mark a message without an id as sent".to_owned(),
            ));
        };
        sqlx::query(
            "UPDATE `message`
             SET `destination` = ?,
                 `mode_id` = ?,
                 `template_id` = ?,
                 `subject` = ?,
                 `body` = ?,
                 `active` = FALSE,
                 `sent` = NOW()
             WHERE `id` = ?",
        )
        .bind(&message.destination)
        .bind(message.mode_id)
        .bind(message.template_id)
        .bind(&message.subject)
        .bind(&message.body)
        .bind(message_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Record a successful batch send on every aggregated row in one
    /// statement, stamping the shared batch UUID.
    pub async fn mark_batch_sent(&self, message: &MessagePayload) -> Result<(), DbError> {
        let Some(batch_id) = &message.batch_id else {
            return Err(DbError::InvalidRow(
                "batch send without a batch id".to_owned(),
            ));
        };
        let mut builder = QueryBuilder::new(
            "UPDATE `message` SET `destination` = ",
        );
        builder.push_bind(&message.destination);
        builder.push(", `mode_id` = ");
        builder.push_bind(message.mode_id);
        builder.push(", `template_id` = ");
        builder.push_bind(message.template_id);
        builder.push(", `subject` = ");
        builder.push_bind(&message.subject);
        builder.push(", `body` = ");
        builder.push_bind(&message.body);
        builder.push(", `batch` = ");
        builder.push_bind(batch_id);
        builder.push(", `active` = FALSE, `sent` = NOW() WHERE `id` IN (");
        let mut separated = builder.separated(", ");
        for id in &message.aggregated_ids {
            separated.push_bind(id);
        }
        builder.push(")");
        builder.build().execute(self.pool()).await?;
        Ok(())
    }

    /// Deactivate one message (no resolvable contact).
    pub async fn deactivate_message(&self, message_id: MessageId) -> Result<(), DbError> {
        sqlx::query("UPDATE `message` SET `active` = 0 WHERE `id` = ?")
            .bind(message_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Persist a mode/destination rewrite so the stored row reflects what
    /// was actually attempted.
    pub async fn update_message_mode(&self, message: &MessagePayload) -> Result<(), DbError> {
        let Some(message_id) = message.message_id else {
            return Ok(());
        };
        sqlx::query("UPDATE `message` SET `mode_id` = ?, `destination` = ? WHERE `id` = ?")
            .bind(message.mode_id)
            .bind(&message.destination)
            .bind(message_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Stored subject and body of a message (API response echoes carry no
    /// template; their content is already in the row).
    pub async fn message_content(
        &self,
        message_id: MessageId,
    ) -> Result<Option<(Option<String>, String)>, DbError> {
        let row: Option<(Option<String>, String)> =
            sqlx::query_as("SELECT `subject`, `body` FROM `message` WHERE `id` = ?")
                .bind(message_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row)
    }
}
