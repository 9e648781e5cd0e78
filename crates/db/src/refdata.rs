//! Reference-data loads backing the sender cache.
//!
//! Each load returns plain rows; the cache assembles them into its lookup
//! tables. Plans are restricted to the ones that can still matter: active
//! plans and plans referenced by an active incident.

use chrono::NaiveDateTime;
use klaxon_core::{
    ApplicationId, IncidentId, Mode, ModeId, PlanId, PlanNotification, PlanNotificationId,
    Priority, PriorityId, RoleId, TargetId, TemplateId,
};
use sqlx::FromRow;

use crate::Db;
use crate::error::DbError;

/// A `plan` row before step assembly.
#[derive(Debug, Clone, FromRow)]
pub struct PlanRow {
    pub id: PlanId,
    pub name: String,
    pub description: Option<String>,
    pub creator: String,
    pub created: NaiveDateTime,
    pub step_count: u32,
    pub threshold_window: u64,
    pub threshold_count: u64,
    pub aggregation_window: u64,
    pub aggregation_reset: u64,
    pub tracking_type: Option<String>,
    pub tracking_key: Option<String>,
    pub tracking_template: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PlanNotificationRow {
    pub id: PlanNotificationId,
    pub plan_id: PlanId,
    pub step: u32,
    pub priority_id: PriorityId,
    pub target_id: TargetId,
    pub role_id: RoleId,
    pub template: String,
    pub repeat: u32,
    pub wait: u64,
}

impl From<PlanNotificationRow> for PlanNotification {
    fn from(row: PlanNotificationRow) -> Self {
        Self {
            id: row.id,
            plan_id: row.plan_id,
            step: row.step,
            priority_id: row.priority_id,
            target_id: row.target_id,
            role_id: row.role_id,
            template: row.template,
            repeat: row.repeat,
            wait: row.wait,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TargetRow {
    pub id: TargetId,
    pub name: String,
    pub target_type: String,
    pub active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct RoleRow {
    pub id: RoleId,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ApplicationRow {
    pub id: ApplicationId,
    pub name: String,
    pub key: String,
}

/// One rendered-template entry: `(template name, application, mode)` ->
/// subject and body sources.
#[derive(Debug, Clone, FromRow)]
pub struct TemplateContentRow {
    pub template_id: TemplateId,
    pub template_name: String,
    pub application: String,
    pub mode: String,
    pub subject: String,
    pub body: String,
}

/// A reprioritization rule joined to names, which is how the resolver
/// keys its lookups.
#[derive(Debug, Clone, FromRow)]
pub struct ReprioritizationRow {
    pub target: String,
    pub src_mode: String,
    pub dst_mode: String,
    pub count: u16,
    pub duration: u64,
}

#[derive(Debug, Clone, FromRow)]
pub struct IncidentApplicationRow {
    pub application_id: ApplicationId,
    pub application: String,
}

const RELEVANT_PLANS_FILTER: &str = "\
(`plan`.`id` IN (SELECT `plan_id` FROM `incident` WHERE `active` = 1)
 OR `plan`.`id` IN (SELECT `plan_id` FROM `plan_active`))";

impl Db {
    /// Plans that are active or referenced by an active incident.
    pub async fn load_plans(&self) -> Result<Vec<PlanRow>, DbError> {
        let sql = format!(
            "SELECT `id`, `name`, `description`, `creator`, `created`, `step_count`,
                    `threshold_window`, `threshold_count`, `aggregation_window`,
                    `aggregation_reset`, `tracking_type`, `tracking_key`, `tracking_template`
             FROM `plan` WHERE {RELEVANT_PLANS_FILTER}"
        );
        Ok(sqlx::query_as::<_, PlanRow>(&sql).fetch_all(self.pool()).await?)
    }

    /// Plan notifications for the same plan set as [`load_plans`](Self::load_plans).
    pub async fn load_plan_notifications(&self) -> Result<Vec<PlanNotificationRow>, DbError> {
        let sql = format!(
            "SELECT `plan_notification`.`id`, `plan_notification`.`plan_id`,
                    `plan_notification`.`step`, `plan_notification`.`priority_id`,
                    `plan_notification`.`target_id`, `plan_notification`.`role_id`,
                    `plan_notification`.`template`, `plan_notification`.`repeat`,
                    `plan_notification`.`wait`
             FROM `plan_notification`
             JOIN `plan` ON `plan`.`id` = `plan_notification`.`plan_id`
             WHERE {RELEVANT_PLANS_FILTER}"
        );
        Ok(sqlx::query_as::<_, PlanNotificationRow>(&sql)
            .fetch_all(self.pool())
            .await?)
    }

    pub async fn load_targets(&self) -> Result<Vec<TargetRow>, DbError> {
        Ok(sqlx::query_as::<_, TargetRow>(
            "SELECT `target`.`id`, `target`.`name`, `target_type`.`name` AS `target_type`,
                    `target`.`active`
             FROM `target`
             JOIN `target_type` ON `target_type`.`id` = `target`.`type_id`",
        )
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn load_modes(&self) -> Result<Vec<Mode>, DbError> {
        let rows: Vec<(ModeId, String)> = sqlx::query_as("SELECT `id`, `name` FROM `mode`")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(id, name)| Mode { id, name }).collect())
    }

    pub async fn load_priorities(&self) -> Result<Vec<Priority>, DbError> {
        let rows: Vec<(PriorityId, String, ModeId)> =
            sqlx::query_as("SELECT `id`, `name`, `mode_id` FROM `priority`")
                .fetch_all(self.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, default_mode_id)| Priority {
                id,
                name,
                default_mode_id,
            })
            .collect())
    }

    pub async fn load_applications(&self) -> Result<Vec<ApplicationRow>, DbError> {
        Ok(sqlx::query_as::<_, ApplicationRow>(
            "SELECT `id`, `name`, `key` FROM `application`",
        )
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn load_roles(&self) -> Result<Vec<RoleRow>, DbError> {
        Ok(
            sqlx::query_as::<_, RoleRow>("SELECT `id`, `name` FROM `target_role`")
                .fetch_all(self.pool())
                .await?,
        )
    }

    /// Active template contents keyed by name, application, and mode.
    pub async fn load_templates(&self) -> Result<Vec<TemplateContentRow>, DbError> {
        Ok(sqlx::query_as::<_, TemplateContentRow>(
            "SELECT `template`.`id` AS `template_id`,
                    `template_active`.`name` AS `template_name`,
                    `application`.`name` AS `application`,
                    `mode`.`name` AS `mode`,
                    `template_content`.`subject` AS `subject`,
                    `template_content`.`body` AS `body`
             FROM `template_active`
             JOIN `template` ON `template`.`id` = `template_active`.`template_id`
             JOIN `template_content` ON `template_content`.`template_id` = `template`.`id`
             JOIN `application` ON `application`.`id` = `template_content`.`application_id`
             JOIN `mode` ON `mode`.`id` = `template_content`.`mode_id`",
        )
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn load_reprioritization_rules(&self) -> Result<Vec<ReprioritizationRow>, DbError> {
        Ok(sqlx::query_as::<_, ReprioritizationRow>(
            "SELECT `target`.`name` AS `target`,
                    `mode_src`.`name` AS `src_mode`,
                    `mode_dst`.`name` AS `dst_mode`,
                    `target_reprioritization`.`count` AS `count`,
                    `target_reprioritization`.`duration` AS `duration`
             FROM `target_reprioritization`
             JOIN `target` ON `target`.`id` = `target_reprioritization`.`target_id`
             JOIN `mode` `mode_src` ON `mode_src`.`id` = `target_reprioritization`.`src_mode_id`
             JOIN `mode` `mode_dst` ON `mode_dst`.`id` = `target_reprioritization`.`dst_mode_id`",
        )
        .fetch_all(self.pool())
        .await?)
    }

    /// Every (team name, member name) pair, for role expansion.
    pub async fn load_team_memberships(&self) -> Result<Vec<(String, String)>, DbError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT `team`.`name`, `member`.`name`
             FROM `user_team`
             JOIN `target` `member` ON `member`.`id` = `user_team`.`user_id`
             JOIN `target` `team` ON `team`.`id` = `user_team`.`team_id`
             WHERE `member`.`active` = 1",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// The application an incident belongs to.
    pub async fn incident_application(
        &self,
        incident_id: IncidentId,
    ) -> Result<Option<IncidentApplicationRow>, DbError> {
        Ok(sqlx::query_as::<_, IncidentApplicationRow>(
            "SELECT `application`.`id` AS `application_id`,
                    `application`.`name` AS `application`
             FROM `incident`
             JOIN `application` ON `application`.`id` = `incident`.`application_id`
             WHERE `incident`.`id` = ?",
        )
        .bind(incident_id)
        .fetch_optional(self.pool())
        .await?)
    }
}
