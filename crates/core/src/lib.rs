//! Domain types for the Klaxon incident notification engine.
//!
//! The database owns all durable state; these types are its working forms.
//! Cross-entity references are integer ids resolved through the sender
//! cache rather than pointers, so reference data can be refreshed
//! atomically.

pub mod audit;
pub mod error;
pub mod incident;
pub mod key;
pub mod message;
pub mod plan;
pub mod reprioritization;
pub mod target;
pub mod types;

pub use audit::ChangeType;
pub use error::CoreError;
pub use incident::Incident;
pub use key::AggregationKey;
pub use message::MessagePayload;
pub use plan::{Plan, PlanNotification, TrackingSettings};
pub use reprioritization::ReprioritizationRule;
pub use target::{Mode, Priority, Target, TargetContact};
pub use types::{
    ApplicationId, IncidentId, MessageId, ModeId, PlanId, PlanNotificationId, PriorityId, RoleId,
    TargetId, TemplateId,
};
