use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{PlanId, PlanNotificationId, PriorityId, RoleId, TargetId};

/// An ordered multi-step escalation policy.
///
/// Plans are immutable after creation; activation is tracked separately in
/// the `plan_active` table (at most one active plan per name). The `steps`
/// map resolves step numbers to the plan notifications executed in parallel
/// at that tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub description: Option<String>,
    /// Username of the plan creator. Used as the fallback target when role
    /// expansion resolves nobody.
    pub creator: String,
    pub created: NaiveDateTime,
    /// Number of steps; `1 <= step <= step_count` for every notification.
    pub step_count: u32,
    /// Sliding-window length in seconds for the rate-limit check.
    pub threshold_window: u64,
    /// Number of sends within `threshold_window` that triggers aggregation.
    pub threshold_count: u64,
    /// Seconds between batch flushes while a key is aggregating.
    pub aggregation_window: u64,
    /// Idle seconds after which a key exits aggregation mode.
    pub aggregation_reset: u64,
    /// Optional out-of-band tracking notification settings.
    pub tracking: Option<TrackingSettings>,
    /// Step number -> plan notification ids fired at that step.
    pub steps: BTreeMap<u32, Vec<PlanNotificationId>>,
}

impl Plan {
    /// Plan notification ids of the given step, empty if the step has none.
    ///
    /// A step inside `1..=step_count` with no notifications indicates plan
    /// corruption; the escalation engine deactivates incidents that advance
    /// into one.
    #[must_use]
    pub fn step(&self, step: u32) -> &[PlanNotificationId] {
        self.steps.get(&step).map_or(&[], Vec::as_slice)
    }

    /// Validate the structural invariants: `step_count >= 1` and every step
    /// key inside `1..=step_count`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.step_count < 1 {
            return Err(CoreError::InvalidPlan(format!(
                "plan {} has step_count {}",
                self.name, self.step_count
            )));
        }
        for step in self.steps.keys() {
            if *step < 1 || *step > self.step_count {
                return Err(CoreError::InvalidPlan(format!(
                    "plan {} has notification at step {} outside 1..={}",
                    self.name, step, self.step_count
                )));
            }
        }
        Ok(())
    }
}

/// Tracking notification settings on a plan.
///
/// When set, each new incident for the plan additionally emits one
/// out-of-band message of `tracking_type` (currently only `email`) to
/// `key`, rendered from the plan's tracking template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Delivery mode name. Only `email` is supported.
    pub tracking_type: String,
    /// Destination, e.g. the tracking mailing list address.
    pub key: String,
    /// Template name rendered per application.
    pub template: String,
}

/// One (priority, role, target, template, repeat, wait) tuple within a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNotification {
    pub id: PlanNotificationId,
    pub plan_id: PlanId,
    /// Step this notification belongs to, `1..=step_count`.
    pub step: u32,
    pub priority_id: PriorityId,
    pub target_id: TargetId,
    pub role_id: RoleId,
    /// Template name resolved at render time through the cache.
    pub template: String,
    /// Additional sends beyond the first at this step.
    pub repeat: u32,
    /// Seconds to wait between sends, and before the step is exhausted.
    pub wait: u64,
}

impl PlanNotification {
    /// Total sends at this step: the first send plus `repeat` repeats.
    #[must_use]
    pub fn max_sends(&self) -> u32 {
        self.repeat + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with_steps(step_count: u32, steps: &[(u32, Vec<PlanNotificationId>)]) -> Plan {
        Plan {
            id: 1,
            name: "test-plan".to_owned(),
            description: None,
            creator: "alice".to_owned(),
            created: chrono::Utc::now().naive_utc(),
            step_count,
            threshold_window: 900,
            threshold_count: 10,
            aggregation_window: 300,
            aggregation_reset: 300,
            tracking: None,
            steps: steps.iter().cloned().collect(),
        }
    }

    #[test]
    fn step_lookup() {
        let plan = plan_with_steps(2, &[(1, vec![10, 11]), (2, vec![12])]);
        assert_eq!(plan.step(1), &[10, 11]);
        assert_eq!(plan.step(2), &[12]);
        assert!(plan.step(3).is_empty());
    }

    #[test]
    fn validate_accepts_well_formed_plan() {
        let plan = plan_with_steps(3, &[(1, vec![1]), (3, vec![2])]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_step_count() {
        let plan = plan_with_steps(0, &[]);
        assert!(matches!(plan.validate(), Err(CoreError::InvalidPlan(_))));
    }

    #[test]
    fn validate_rejects_step_out_of_range() {
        let plan = plan_with_steps(2, &[(5, vec![1])]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn max_sends_counts_first_send() {
        let n = PlanNotification {
            id: 1,
            plan_id: 1,
            step: 1,
            priority_id: 1,
            target_id: 1,
            role_id: 1,
            template: "t".to_owned(),
            repeat: 2,
            wait: 300,
        };
        assert_eq!(n.max_sends(), 3);
    }
}
