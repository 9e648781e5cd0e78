use serde::{Deserialize, Serialize};

use crate::key::AggregationKey;
use crate::types::{
    ApplicationId, IncidentId, MessageId, ModeId, PlanId, PlanNotificationId, PriorityId,
    TemplateId,
};

/// A message in flight through the sender pipeline.
///
/// This is the denormalized working form of a `message` row joined with its
/// plan, application, target, and priority names. The same shape travels
/// over RPC: the API submits out-of-band payloads to `v0/send`, and the
/// master forwards fully prepared payloads to slaves on `v0/slave_send`.
///
/// Out-of-band notifications have `plan_id = None` and bypass aggregation.
/// Batch messages carry the full `aggregated_ids` set and a shared
/// `batch_id`; their single payload represents every message in the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Row id, `None` for out-of-band notifications that have no row.
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub incident_id: Option<IncidentId>,
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub plan_notification_id: Option<PlanNotificationId>,
    /// Application name the message belongs to.
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub application_id: Option<ApplicationId>,
    /// Target name the message is addressed to.
    #[serde(default)]
    pub target: String,
    /// Priority name, one component of the aggregation key.
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub priority_id: PriorityId,
    /// Delivery mode name. Pre-set for out-of-band notifications; resolved
    /// by the contact resolver otherwise.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub mode_id: Option<ModeId>,
    /// Concrete address for the resolved mode (email address, phone number,
    /// chat handle).
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
    /// Template name; `None` for out-of-band messages with pre-populated
    /// content and for stored-content echoes.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    /// Incident context for rendering, with sender metadata injected under
    /// the `klaxon` key at poll time.
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    /// Shared batch UUID, set when this payload represents a flushed batch.
    #[serde(default)]
    pub batch_id: Option<String>,
    /// Ids of every message aggregated into this batch.
    #[serde(default)]
    pub aggregated_ids: Vec<MessageId>,
    /// Extra HTML appended by the renderer (oneclick claim markup).
    #[serde(default)]
    pub extra_html: Option<String>,
    /// Suppress reply handling; set on tracking notifications.
    #[serde(default)]
    pub noreply: bool,
}

impl MessagePayload {
    /// The aggregation key, or `None` for out-of-band messages.
    #[must_use]
    pub fn aggregation_key(&self) -> Option<AggregationKey> {
        self.plan_id.map(|plan_id| AggregationKey {
            plan_id,
            application: self.application.clone(),
            priority: self.priority.clone(),
            target: self.target.clone(),
        })
    }

    /// Whether this payload represents a flushed batch.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        !self.aggregated_ids.is_empty()
    }

    /// Inject sender metadata into the rendering context under `klaxon`.
    ///
    /// Called at poll time, before the payload enters the intake queue, so
    /// templates can reference `{{ klaxon.incident_id }}` and friends.
    pub fn inject_context_meta(&mut self) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        let Some(map) = context.as_object_mut() else {
            return;
        };
        map.insert(
            "klaxon".to_owned(),
            serde_json::json!({
                "message_id": self.message_id,
                "incident_id": self.incident_id,
                "plan": self.plan,
                "plan_id": self.plan_id,
                "application": self.application,
                "target": self.target,
                "priority": self.priority,
                "template": self.template,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_key_requires_plan() {
        let mut m = MessagePayload {
            plan_id: Some(3),
            application: "app".to_owned(),
            priority: "high".to_owned(),
            target: "alice".to_owned(),
            ..MessagePayload::default()
        };
        let key = m.aggregation_key().unwrap();
        assert_eq!(key.plan_id, 3);
        assert_eq!(key.target, "alice");

        m.plan_id = None;
        assert!(m.aggregation_key().is_none());
    }

    #[test]
    fn batch_detection() {
        let mut m = MessagePayload::default();
        assert!(!m.is_batch());
        m.aggregated_ids = vec![1, 2];
        assert!(m.is_batch());
    }

    #[test]
    fn context_meta_injection() {
        let mut m = MessagePayload {
            message_id: Some(42),
            incident_id: Some(7),
            application: "app".to_owned(),
            context: Some(serde_json::json!({"host": "web01"})),
            ..MessagePayload::default()
        };
        m.inject_context_meta();
        let ctx = m.context.unwrap();
        assert_eq!(ctx["host"], "web01");
        assert_eq!(ctx["klaxon"]["message_id"], 42);
        assert_eq!(ctx["klaxon"]["incident_id"], 7);
    }

    #[test]
    fn context_meta_injection_without_context_is_noop() {
        let mut m = MessagePayload::default();
        m.inject_context_meta();
        assert!(m.context.is_none());
    }

    #[test]
    fn payload_serde_roundtrip() {
        let m = MessagePayload {
            message_id: Some(1),
            plan_id: Some(2),
            application: "app".to_owned(),
            target: "bob".to_owned(),
            priority: "urgent".to_owned(),
            body: "hello".to_owned(),
            ..MessagePayload::default()
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: MessagePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_id, m.message_id);
        assert_eq!(back.body, m.body);
    }
}
