//! Escalation queries: the three master-tick passes and message insertion.
//!
//! All three passes are idempotent SQL over the `message`/`incident`/
//! `plan_notification` join; the engine re-derives everything from durable
//! state on every tick.

use klaxon_core::{
    ApplicationId, IncidentId, MessageId, PlanId, PlanNotificationId, PriorityId, TargetId,
};
use sqlx::FromRow;
use tracing::debug;

use crate::Db;
use crate::error::DbError;

/// A newly created incident awaiting its first step.
#[derive(Debug, Clone, FromRow)]
pub struct NewIncidentRow {
    pub id: IncidentId,
    pub plan_id: PlanId,
    /// Raw JSON context as stored.
    pub context: String,
    pub application_id: ApplicationId,
    pub application: String,
}

/// One (incident, plan notification) pair that is due for action:
/// either another repeat send or a step advance.
#[derive(Debug, Clone, FromRow)]
pub struct EscalationCandidateRow {
    pub incident_id: IncidentId,
    pub plan_id: PlanId,
    pub plan_notification_id: PlanNotificationId,
    /// Messages emitted so far for this pair at this step.
    pub count: i64,
    /// Total sends allowed: `repeat + 1`.
    pub max: i64,
    /// Seconds since the most recent message for the pair was created.
    pub age: i64,
    pub wait: i64,
    pub step: u32,
    pub current_step: u32,
    pub step_count: u32,
}

const NEW_INCIDENTS_SQL: &str = "\
SELECT
    `incident`.`id` AS `id`,
    `incident`.`plan_id` AS `plan_id`,
    `incident`.`context` AS `context`,
    `application`.`id` AS `application_id`,
    `application`.`name` AS `application`
FROM `incident`
JOIN `application` ON `incident`.`application_id` = `application`.`id`
WHERE `current_step` = 0 AND `active` = 1";

const DEACTIVATE_EXHAUSTED_SQL: &str = "\
UPDATE `incident`
SET `active` = 0
WHERE `id` IN (
    SELECT DISTINCT `incident_id`
    FROM (
        SELECT
            `incident_id`,
            `max`,
            MAX(`count`) AS `max_count`
        FROM (
            SELECT
                `message`.`incident_id` AS `incident_id`,
                `message`.`plan_notification_id` AS `plan_notification_id`,
                CAST(COUNT(`message`.`id`) AS SIGNED) AS `count`,
                CAST(`plan_notification`.`repeat` + 1 AS SIGNED) AS `max`,
                TIMESTAMPDIFF(SECOND, MAX(`message`.`sent`), NOW()) AS `age`,
                `plan_notification`.`wait` AS `wait`,
                `plan_notification`.`step` AS `step`
            FROM `message`
            JOIN `incident` ON `message`.`incident_id` = `incident`.`id`
            JOIN `plan_notification` ON `message`.`plan_notification_id` = `plan_notification`.`id`
            JOIN `plan` ON `message`.`plan_id` = `plan`.`id`
            WHERE `incident`.`active` = 1
            AND `incident`.`current_step` = `plan`.`step_count`
            AND `step` = `incident`.`current_step`
            GROUP BY `incident`.`id`, `message`.`plan_notification_id`, `message`.`target_id`
        ) AS `inner`
        GROUP BY `incident_id`, `plan_notification_id`, `max`
        HAVING `max_count` = `max` AND BIT_AND(`age` > `wait`) = 1
    ) AS `exhausted_incidents`
)";

const ESCALATION_CANDIDATES_SQL: &str = "\
SELECT
    `incident_id`,
    `plan_id`,
    `plan_notification_id`,
    MAX(`count`) AS `count`,
    `max`,
    MIN(`age`) AS `age`,
    `wait`,
    `step`,
    `current_step`,
    `step_count`
FROM (
    SELECT
        `message`.`incident_id` AS `incident_id`,
        `message`.`plan_notification_id` AS `plan_notification_id`,
        CAST(COUNT(`message`.`id`) AS SIGNED) AS `count`,
        CAST(`plan_notification`.`repeat` + 1 AS SIGNED) AS `max`,
        TIMESTAMPDIFF(SECOND, MAX(`message`.`created`), NOW()) AS `age`,
        CAST(`plan_notification`.`wait` AS SIGNED) AS `wait`,
        `plan_notification`.`step` AS `step`,
        `incident`.`current_step` AS `current_step`,
        `plan`.`step_count` AS `step_count`,
        `message`.`plan_id` AS `plan_id`
    FROM `message`
    JOIN `incident` ON `message`.`incident_id` = `incident`.`id`
    JOIN `plan_notification` ON `message`.`plan_notification_id` = `plan_notification`.`id`
    JOIN `plan` ON `message`.`plan_id` = `plan`.`id`
    WHERE `incident`.`active` = 1
    GROUP BY `incident`.`id`, `message`.`plan_notification_id`, `message`.`target_id`
) AS `inner`
GROUP BY `incident_id`, `plan_notification_id`, `plan_id`, `max`, `wait`,
         `step`, `current_step`, `step_count`
HAVING MIN(`age`) > `wait` AND (MAX(`count`) < `max`
                           OR (MAX(`count`) = `max` AND `step` = `current_step`
                               AND `step` < `step_count`))";

impl Db {
    /// Incidents at `current_step = 0` waiting for their first step.
    pub async fn new_incidents(&self) -> Result<Vec<NewIncidentRow>, DbError> {
        let rows = sqlx::query_as::<_, NewIncidentRow>(NEW_INCIDENTS_SQL)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Mark incidents inactive when every notification of their final step
    /// has hit `repeat + 1` sends and its wait has elapsed since the most
    /// recent send. Returns the number of deactivated incidents.
    pub async fn deactivate_exhausted_incidents(&self) -> Result<u64, DbError> {
        let result = sqlx::query(DEACTIVATE_EXHAUSTED_SQL)
            .execute(self.pool())
            .await?;
        debug!(deactivated = result.rows_affected(), "deactivation pass complete");
        Ok(result.rows_affected())
    }

    /// (incident, plan notification) pairs whose wait has elapsed and that
    /// need a repeat send or qualify the incident for a step advance.
    pub async fn escalation_candidates(&self) -> Result<Vec<EscalationCandidateRow>, DbError> {
        let rows = sqlx::query_as::<_, EscalationCandidateRow>(ESCALATION_CANDIDATES_SQL)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Move an incident to the given step.
    pub async fn set_incident_step(
        &self,
        incident_id: IncidentId,
        step: u32,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE `incident` SET `current_step` = ? WHERE `id` = ?")
            .bind(step)
            .bind(incident_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Deactivate one incident (used when its plan turns out corrupt).
    pub async fn invalidate_incident(&self, incident_id: IncidentId) -> Result<(), DbError> {
        sqlx::query("UPDATE `incident` SET `active` = 0 WHERE `id` = ?")
            .bind(incident_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Insert one message row for a plan notification send and return its id.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_message(
        &self,
        plan_id: PlanId,
        plan_notification_id: PlanNotificationId,
        incident_id: IncidentId,
        application_id: ApplicationId,
        target_id: TargetId,
        priority_id: PriorityId,
        body: &str,
    ) -> Result<MessageId, DbError> {
        let result = sqlx::query(
            "INSERT INTO `message`
                (`created`, `plan_id`, `plan_notification_id`, `incident_id`,
                 `application_id`, `target_id`, `priority_id`, `body`)
             VALUES (NOW(), ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(plan_id)
        .bind(plan_notification_id)
        .bind(incident_id)
        .bind(application_id)
        .bind(target_id)
        .bind(priority_id)
        .bind(body)
        .execute(self.pool())
        .await?;
        MessageId::try_from(result.last_insert_id())
            .map_err(|_| DbError::InvalidRow("message id out of range".to_owned()))
    }
}
