//! Integer id aliases for the durable entities.
//!
//! Every entity is keyed by an integer id assigned by the database.
//! In-memory structures hold ids and resolve them through the sender cache,
//! which keeps the cyclic plan/notification/template references flat and
//! makes atomic cache refresh possible.

/// Row id of a `plan`.
pub type PlanId = i64;

/// Row id of a `plan_notification`.
pub type PlanNotificationId = i64;

/// Row id of an `incident`.
pub type IncidentId = i64;

/// Row id of a `message`.
pub type MessageId = i64;

/// Row id of an `application`.
pub type ApplicationId = i64;

/// Row id of a `target` (user or role expansion source).
pub type TargetId = i64;

/// Row id of a `priority`.
pub type PriorityId = i64;

/// Row id of a `mode` (email, sms, call, im).
pub type ModeId = i64;

/// Row id of a `template`.
pub type TemplateId = i64;

/// Row id of a `target_role`.
pub type RoleId = i64;
