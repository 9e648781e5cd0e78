use serde::{Deserialize, Serialize};

use crate::types::{ModeId, PriorityId, TargetId};

/// A human target or a role expansion source (e.g. a team whose oncall
/// rotation resolves to users).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    /// Target type name from `target_type` (`user`, `team`, ...).
    pub target_type: String,
    pub active: bool,
}

/// A (target, mode) -> destination mapping, unique per pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetContact {
    pub target_id: TargetId,
    pub mode_id: ModeId,
    pub destination: String,
}

/// A delivery mode: email, sms, call, im.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mode {
    pub id: ModeId,
    pub name: String,
}

/// A message priority with its default delivery mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priority {
    pub id: PriorityId,
    pub name: String,
    /// Mode used when neither a per-application nor a per-user preference
    /// exists for this priority.
    pub default_mode_id: ModeId,
}
