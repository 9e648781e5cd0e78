//! The escalation state machine. Runs exclusively on the master.
//!
//! Three idempotent passes per tick, in order: `escalate` (new incidents
//! plus in-flight repeats/advances), `deactivate` (exhausted incidents),
//! and the message poll/aggregate handled elsewhere. The decisions are
//! derived from SQL over durable state each tick, so a crashed pass
//! re-runs cleanly.

use std::collections::HashMap;

use klaxon_core::{ApplicationId, ChangeType, IncidentId, MessagePayload, PlanId, PriorityId};
use klaxon_db::{Db, EscalationCandidateRow, NewIncidentRow};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, instrument, warn};

use crate::auditlog::AuditLog;
use crate::cache::Cache;
use crate::error::SenderError;
use crate::metrics::SenderMetrics;
use crate::renderer::Renderer;

/// What one escalation candidate row calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CandidateAction {
    /// Emit another message for the same plan notification.
    Repeat,
    /// The notification is saturated at the incident's current step and a
    /// later step exists: advance the incident.
    Advance,
    /// Nothing to do yet.
    Wait,
}

/// Decide what a candidate row calls for.
///
/// The SQL pre-filters on the same conditions; this re-derivation keeps the
/// rule in one reviewable (and testable) place.
pub(crate) fn candidate_action(row: &EscalationCandidateRow) -> CandidateAction {
    if row.age <= row.wait {
        return CandidateAction::Wait;
    }
    if row.count < row.max {
        CandidateAction::Repeat
    } else if row.count == row.max && row.step == row.current_step && row.step < row.step_count {
        CandidateAction::Advance
    } else {
        CandidateAction::Wait
    }
}

/// Step to record after generating a step's messages.
///
/// An advance that produced zero messages (every role lookup came up empty)
/// rolls back one step so the next tick retries the advance; for step 1
/// that is the original reset-to-zero behavior.
pub(crate) fn step_after_generation(step: u32, successes: usize) -> u32 {
    if successes == 0 { step.saturating_sub(1) } else { step }
}

/// Target list, priority, and body prefix for one plan notification send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GenerationPlan {
    pub(crate) names: Vec<String>,
    pub(crate) priority_id: PriorityId,
    pub(crate) body: String,
    /// True when role expansion failed and the plan creator was substituted.
    pub(crate) changed_target: bool,
}

/// Resolve who a plan notification reaches.
///
/// Empty role expansion falls back to the plan creator at `low` priority
/// with an explanatory body prefix. `None` means no message can be
/// generated at all (the creator or the low priority is unresolvable); the
/// caller's step handling deals with the consequences.
pub(crate) fn resolve_generation(
    cache: &Cache,
    notification: &klaxon_core::PlanNotification,
) -> Option<GenerationPlan> {
    let role = cache.role_name(notification.role_id)?;
    let target = cache.target_name(notification.target_id)?;
    let names = cache.targets_for_role(&role, &target);

    if !names.is_empty() {
        return Some(GenerationPlan {
            names,
            priority_id: notification.priority_id,
            body: String::new(),
            changed_target: false,
        });
    }

    let creator = cache.plan(notification.plan_id).map(|plan| plan.creator)?;
    let low = cache.priority_by_name("low")?;
    Some(GenerationPlan {
        names: vec![creator],
        priority_id: low.id,
        body: format!(
            "You are receiving this as you created this plan and we can't \
             resolve {role} of {target} at this time.\n\n"
        ),
        changed_target: true,
    })
}

/// An incident queued for a step advance this tick.
struct PendingAdvance {
    plan_id: PlanId,
    application_id: Option<ApplicationId>,
    step: u32,
}

/// Drives incidents through their plans.
pub struct EscalationEngine {
    db: Db,
    cache: Arc<Cache>,
    metrics: Arc<SenderMetrics>,
    audit: AuditLog,
    renderer: Arc<Renderer>,
    send_tx: UnboundedSender<MessagePayload>,
}

impl EscalationEngine {
    #[must_use]
    pub fn new(
        db: Db,
        cache: Arc<Cache>,
        metrics: Arc<SenderMetrics>,
        audit: AuditLog,
        renderer: Arc<Renderer>,
        send_tx: UnboundedSender<MessagePayload>,
    ) -> Self {
        Self {
            db,
            cache,
            metrics,
            audit,
            renderer,
            send_tx,
        }
    }

    /// Mark incidents whose final step is exhausted as inactive.
    #[instrument(skip_all)]
    pub async fn deactivate(&self) -> Result<u64, SenderError> {
        let deactivated = self.db.deactivate_exhausted_incidents().await?;
        if deactivated > 0 {
            info!(deactivated, "incidents exhausted");
        }
        Ok(deactivated)
    }

    /// Advance new incidents to step 1, repeat due notifications, and
    /// escalate saturated steps.
    #[instrument(skip_all)]
    pub async fn escalate(&self) -> Result<(), SenderError> {
        let mut escalations: HashMap<IncidentId, PendingAdvance> = HashMap::new();

        let new_rows = self.db.new_incidents().await?;
        info!(new = new_rows.len(), "new incidents");
        for row in &new_rows {
            escalations.insert(
                row.id,
                PendingAdvance {
                    plan_id: row.plan_id,
                    application_id: Some(row.application_id),
                    step: 1,
                },
            );
            self.send_tracking_notification(row);
        }

        // Repeats and advances for in-flight incidents.
        let mut application_ids: HashMap<IncidentId, Option<ApplicationId>> = HashMap::new();
        let mut message_count = 0usize;
        for row in self.db.escalation_candidates().await? {
            match candidate_action(&row) {
                CandidateAction::Repeat => {
                    let Some(application_id) =
                        self.application_id(row.incident_id, &mut application_ids).await?
                    else {
                        continue;
                    };
                    if self
                        .create_messages(row.incident_id, application_id, row.plan_notification_id)
                        .await?
                    {
                        message_count += 1;
                    }
                }
                CandidateAction::Advance => {
                    escalations.insert(
                        row.incident_id,
                        PendingAdvance {
                            plan_id: row.plan_id,
                            application_id: None,
                            step: row.current_step + 1,
                        },
                    );
                }
                CandidateAction::Wait => {}
            }
        }

        for (incident_id, pending) in escalations {
            let Some(plan) = self.cache.plan(pending.plan_id) else {
                warn!(
                    incident_id,
                    plan_id = pending.plan_id,
                    "plan missing from cache, retrying next tick"
                );
                continue;
            };
            let notifications = plan.step(pending.step).to_vec();
            if notifications.is_empty() {
                error!(
                    plan_id = pending.plan_id,
                    incident_id, step = pending.step, "plan has no notifications at step"
                );
                self.db.invalidate_incident(incident_id).await?;
                continue;
            }

            let application_id = match pending.application_id {
                Some(id) => id,
                None => {
                    let Some(id) = self.application_id(incident_id, &mut application_ids).await?
                    else {
                        continue;
                    };
                    id
                }
            };

            let mut successes = 0usize;
            for notification_id in notifications {
                if self
                    .create_messages(incident_id, application_id, notification_id)
                    .await?
                {
                    successes += 1;
                }
            }
            message_count += successes;

            let step = step_after_generation(pending.step, successes);
            if step != pending.step {
                warn!(
                    incident_id,
                    step = pending.step, "no messages generated at step, rolling back for retry"
                );
            }
            self.db.set_incident_step(incident_id, step).await?;
        }

        info!(messages = message_count, "escalate pass finished");
        Ok(())
    }

    /// Insert one message per resolved target for a plan notification.
    ///
    /// Returns `false` when the notification could generate nothing (role
    /// lookup failed and the creator fallback is also unresolvable).
    pub async fn create_messages(
        &self,
        incident_id: IncidentId,
        application_id: ApplicationId,
        plan_notification_id: i64,
    ) -> Result<bool, SenderError> {
        let Some(notification) = self.cache.plan_notification(plan_notification_id) else {
            error!(plan_notification_id, "plan notification missing from cache");
            return Ok(false);
        };

        let Some(generation) = resolve_generation(&self.cache, &notification) else {
            self.metrics.incr_role_target_lookup_error();
            error!(
                incident_id,
                plan_notification_id,
                "failed to find targets and could not fall back to the plan creator"
            );
            return Ok(false);
        };
        if generation.changed_target {
            self.metrics.incr_role_target_lookup_error();
            let fallback = generation.names.first().map_or("?", String::as_str);
            error!(
                incident_id,
                plan_notification_id,
                fallback,
                "failed to find targets, reaching out to the plan creator at low priority"
            );
        }

        let role_target = {
            // Audit old-value form: `role|target` of the failed expansion.
            let role = self
                .cache
                .role_name(notification.role_id)
                .unwrap_or_default();
            let target = self
                .cache
                .target_name(notification.target_id)
                .unwrap_or_default();
            format!("{role}|{target}")
        };

        for name in &generation.names {
            let Some(target_id) = self.cache.target_id(name) else {
                self.metrics.incr_target_not_found();
                error!(name = %name, "no target found");
                continue;
            };
            let message_id = self
                .db
                .insert_message(
                    notification.plan_id,
                    plan_notification_id,
                    incident_id,
                    application_id,
                    target_id,
                    generation.priority_id,
                    &generation.body,
                )
                .await?;
            if generation.changed_target {
                self.audit
                    .message_change(
                        message_id,
                        ChangeType::TargetChange,
                        &role_target,
                        name,
                        "Changing target as we failed resolving original target",
                    )
                    .await;
            }
        }
        Ok(true)
    }

    /// Emit the plan's out-of-band tracking notification for a new
    /// incident, when configured and renderable for its application.
    fn send_tracking_notification(&self, row: &NewIncidentRow) {
        let Some(plan) = self.cache.plan(row.plan_id) else {
            return;
        };
        let Some(tracking) = plan.tracking.clone() else {
            return;
        };
        if tracking.tracking_type != "email" {
            warn!(
                plan_id = plan.id,
                tracking_type = %tracking.tracking_type,
                "unsupported tracking type"
            );
            return;
        }

        let mut context: serde_json::Value =
            serde_json::from_str(&row.context).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(map) = context.as_object_mut() {
            map.insert(
                "klaxon".to_owned(),
                serde_json::json!({
                    "incident_id": row.id,
                    "plan": plan.name,
                    "plan_id": plan.id,
                    "application": row.application,
                }),
            );
        }

        let Some((subject, body)) = self.renderer.render_tracking(&plan, &row.application, &context)
        else {
            return;
        };

        let message = MessagePayload {
            noreply: true,
            destination: Some(tracking.key),
            mode: Some(tracking.tracking_type),
            subject: Some(subject),
            body,
            application: row.application.clone(),
            ..MessagePayload::default()
        };
        info!(incident_id = row.id, "sending tracking notification");
        let _ = self.send_tx.send(message);
    }

    async fn application_id(
        &self,
        incident_id: IncidentId,
        memo: &mut HashMap<IncidentId, Option<ApplicationId>>,
    ) -> Result<Option<ApplicationId>, SenderError> {
        if let Some(cached) = memo.get(&incident_id) {
            return Ok(*cached);
        }
        let row = self.db.incident_application(incident_id).await?;
        let id = row.map(|r| r.application_id);
        if id.is_none() {
            error!(incident_id, "incident has no application");
        }
        memo.insert(incident_id, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Tables;
    use klaxon_core::{PlanNotification, Priority};

    fn row(
        count: i64,
        max: i64,
        age: i64,
        wait: i64,
        step: u32,
        current_step: u32,
        step_count: u32,
    ) -> EscalationCandidateRow {
        EscalationCandidateRow {
            incident_id: 1,
            plan_id: 1,
            plan_notification_id: 1,
            count,
            max,
            age,
            wait,
            step,
            current_step,
            step_count,
        }
    }

    // Plan from the two-step walkthrough: step 1 -> user_a (repeat 0,
    // wait 30), step 2 -> user_b (repeat 1, wait 10).
    #[test]
    fn two_step_plan_walkthrough() {
        // t=35: step 1 saturated (count=max=1), wait exceeded, step 2
        // exists: advance.
        assert_eq!(
            candidate_action(&row(1, 1, 35, 30, 1, 1, 2)),
            CandidateAction::Advance
        );
        // t=46: step 2, one of two sends out, wait exceeded: repeat.
        assert_eq!(
            candidate_action(&row(1, 2, 11, 10, 2, 2, 2)),
            CandidateAction::Repeat
        );
        // t=57: step 2 saturated and it is the final step: nothing to do
        // here (deactivation handles exhaustion).
        assert_eq!(
            candidate_action(&row(2, 2, 11, 10, 2, 2, 2)),
            CandidateAction::Wait
        );
    }

    #[test]
    fn wait_not_elapsed_means_wait() {
        assert_eq!(
            candidate_action(&row(1, 2, 10, 30, 1, 1, 2)),
            CandidateAction::Wait
        );
    }

    #[test]
    fn saturated_non_current_step_does_not_advance() {
        // A stale step's rows cannot advance the incident.
        assert_eq!(
            candidate_action(&row(1, 1, 99, 30, 1, 2, 3)),
            CandidateAction::Wait
        );
    }

    #[test]
    fn step_rollback_on_zero_messages() {
        assert_eq!(step_after_generation(1, 0), 0);
        assert_eq!(step_after_generation(3, 0), 2);
        assert_eq!(step_after_generation(2, 1), 2);
    }

    fn notification() -> PlanNotification {
        PlanNotification {
            id: 10,
            plan_id: 1,
            step: 1,
            priority_id: 5,
            target_id: 100,
            role_id: 7,
            template: "outage".to_owned(),
            repeat: 0,
            wait: 300,
        }
    }

    fn tables_for_generation(role: &str, expandable: bool) -> Tables {
        let mut tables = Tables::default();
        tables.roles.insert(7, role.to_owned());
        tables.target_names.insert(100, "db-team".to_owned());
        tables.target_ids.insert("alice".to_owned(), 1);
        if expandable {
            tables
                .teams
                .insert("db-team".to_owned(), vec!["alice".to_owned()]);
        }
        tables.plans.insert(
            1,
            klaxon_core::Plan {
                id: 1,
                name: "db-plan".to_owned(),
                description: None,
                creator: "alice".to_owned(),
                created: chrono::Utc::now().naive_utc(),
                step_count: 1,
                threshold_window: 1,
                threshold_count: 1,
                aggregation_window: 1,
                aggregation_reset: 1,
                tracking: None,
                steps: std::collections::BTreeMap::new(),
            },
        );
        tables.priorities_by_name.insert(
            "low".to_owned(),
            Priority {
                id: 99,
                name: "low".to_owned(),
                default_mode_id: 1,
            },
        );
        tables
    }

    #[tokio::test]
    async fn generation_uses_expanded_targets() {
        let cache = Cache::with_tables(tables_for_generation("team", true));
        let generation = resolve_generation(&cache, &notification()).unwrap();
        assert_eq!(generation.names, vec!["alice"]);
        assert_eq!(generation.priority_id, 5);
        assert!(generation.body.is_empty());
        assert!(!generation.changed_target);
    }

    #[tokio::test]
    async fn empty_expansion_falls_back_to_creator_at_low_priority() {
        // Role expansion yields nobody (oncall with no source wired in);
        // the plan creator gets nagged at low priority instead.
        let cache = Cache::with_tables(tables_for_generation("oncall", false));
        let generation = resolve_generation(&cache, &notification()).unwrap();
        assert_eq!(generation.names, vec!["alice"]);
        assert_eq!(generation.priority_id, 99);
        assert!(generation.body.starts_with(
            "You are receiving this as you created this plan"
        ));
        assert!(generation.body.contains("oncall of db-team"));
        assert!(generation.changed_target);
    }

    #[tokio::test]
    async fn missing_low_priority_fails_generation() {
        let mut tables = tables_for_generation("oncall", false);
        tables.priorities_by_name.clear();
        let cache = Cache::with_tables(tables);
        assert!(resolve_generation(&cache, &notification()).is_none());
    }

    #[tokio::test]
    async fn missing_creator_fails_generation() {
        let mut tables = tables_for_generation("oncall", false);
        tables.plans.clear();
        let cache = Cache::with_tables(tables);
        assert!(resolve_generation(&cache, &notification()).is_none());
    }
}
