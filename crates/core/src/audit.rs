use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of change recorded in the `message_changelog` audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// The message's target was substituted (creator fallback).
    TargetChange,
    /// The message's delivery mode was rewritten (contact fallback,
    /// reprioritization, vendor-failure reclassification).
    ModeChange,
    /// The message's send disposition changed (entered aggregation).
    SentChange,
}

impl ChangeType {
    /// The string stored in the `change_type` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TargetChange => "target_change",
            Self::ModeChange => "mode_change",
            Self::SentChange => "sent_change",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
