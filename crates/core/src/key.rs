use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::PlanId;

/// The aggregation key: `(plan, application, priority, target)`.
///
/// Rate-limit windows, aggregation queues, and batch flush timestamps are
/// all tracked per key. Names rather than ids are used for the application,
/// priority, and target components because that is what the unsent-message
/// poll yields; the plan is keyed by id so plan renames don't split a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    pub plan_id: PlanId,
    pub application: String,
    pub priority: String,
    pub target: String,
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.plan_id, self.application, self.priority, self.target
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_tuple_form() {
        let key = AggregationKey {
            plan_id: 7,
            application: "grafana".to_owned(),
            priority: "high".to_owned(),
            target: "alice".to_owned(),
        };
        assert_eq!(key.to_string(), "(7, grafana, high, alice)");
    }

    #[test]
    fn keys_hash_by_value() {
        let a = AggregationKey {
            plan_id: 1,
            application: "app".to_owned(),
            priority: "low".to_owned(),
            target: "bob".to_owned(),
        };
        let b = a.clone();
        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }
}
