use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::{ApplicationId, IncidentId, PlanId};

/// A single triggering event for a plan.
///
/// Created with `current_step = 0` and `active = true`. The maintenance
/// loop is the sole writer of `current_step` (monotonically increasing,
/// except a reset after a step advance that produced no messages) and of
/// the `active = false` transition; claiming via the API sets `owner` and
/// deactivates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub plan_id: PlanId,
    pub application_id: ApplicationId,
    /// Application-supplied JSON context, fed to template rendering.
    pub context: serde_json::Value,
    pub created: NaiveDateTime,
    pub updated: Option<NaiveDateTime>,
    /// Current escalation step, `0..=plan.step_count`.
    pub current_step: u32,
    pub active: bool,
    /// Username of the claimer, set when the incident is acknowledged.
    pub owner: Option<String>,
}

impl Incident {
    /// Whether the incident still escalates.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.active && self.owner.is_none()
    }
}
