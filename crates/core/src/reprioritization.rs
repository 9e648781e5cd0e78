use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{ModeId, TargetId};

/// Duration bounds for a reprioritization rule, in seconds.
pub const MIN_DURATION_SECONDS: u64 = 60;
pub const MAX_DURATION_SECONDS: u64 = 3600;

/// Maximum trigger count for a reprioritization rule.
pub const MAX_COUNT: u16 = 255;

/// Automatic mode rewriting after repeated sends.
///
/// After `count` messages to `target` via `src_mode` within `duration`
/// seconds, subsequent `src_mode` messages for that target are rewritten
/// to `dst_mode`. The classic use is downgrading a noisy call rotation to
/// email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprioritizationRule {
    pub target_id: TargetId,
    pub src_mode_id: ModeId,
    pub dst_mode_id: ModeId,
    /// Trigger threshold, `1..=255`.
    pub count: u16,
    /// Window length in seconds, `60..=3600`.
    pub duration: u64,
}

impl ReprioritizationRule {
    /// Validate the count and duration bounds.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.count == 0 {
            return Err(CoreError::InvalidRule(
                "count must be greater than 0".to_owned(),
            ));
        }
        if self.count > MAX_COUNT {
            return Err(CoreError::InvalidRule(format!(
                "count must be at most {MAX_COUNT}"
            )));
        }
        if self.duration < MIN_DURATION_SECONDS {
            return Err(CoreError::InvalidRule(format!(
                "duration must be at least {MIN_DURATION_SECONDS} seconds"
            )));
        }
        if self.duration > MAX_DURATION_SECONDS {
            return Err(CoreError::InvalidRule(format!(
                "duration must be at most {MAX_DURATION_SECONDS} seconds"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(count: u16, duration: u64) -> ReprioritizationRule {
        ReprioritizationRule {
            target_id: 1,
            src_mode_id: 2,
            dst_mode_id: 3,
            count,
            duration,
        }
    }

    #[test]
    fn accepts_bounds() {
        assert!(rule(1, 60).validate().is_ok());
        assert!(rule(255, 3600).validate().is_ok());
    }

    #[test]
    fn rejects_zero_count() {
        assert!(rule(0, 300).validate().is_err());
    }

    #[test]
    fn rejects_count_over_255() {
        assert!(rule(256, 300).validate().is_err());
    }

    #[test]
    fn rejects_short_duration() {
        assert!(rule(5, 59).validate().is_err());
    }

    #[test]
    fn rejects_long_duration() {
        assert!(rule(5, 3601).validate().is_err());
    }
}
