//! Per-key sliding-window rate limiting and batch forming.
//!
//! All five maps live in one [`AggState`] behind a single mutex with an
//! explicit lifecycle; the classification and flush transitions are pure
//! functions over that state so the time-based behavior is testable
//! without a database or a clock. The mutex is never held across an
//! await -- flush snapshots the due keys, queries the active-id filter,
//! and re-acquires the lock to apply the result.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use klaxon_core::{AggregationKey, ChangeType, MessageId, MessagePayload, Plan};
use klaxon_db::Db;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auditlog::AuditLog;
use crate::cache::Cache;
use crate::error::SenderError;

/// The in-memory aggregation state.
///
/// Everything here is derived: a restart rebuilds it empty and the worst
/// case is one burst being sent unaggregated.
#[derive(Debug, Default)]
pub(crate) struct AggState {
    /// Rate-limit windows: key -> bucket timestamp -> count.
    pub(crate) windows: HashMap<AggregationKey, BTreeMap<u64, u64>>,
    /// Timestamp of the most recent message aggregated under a key; absence
    /// means the key is not in aggregation mode.
    pub(crate) aggregation: HashMap<AggregationKey, u64>,
    /// Message ids buffered for a key's next batch.
    pub(crate) queues: HashMap<AggregationKey, HashSet<MessageId>>,
    /// Last batch flush time per key.
    pub(crate) sent: HashMap<AggregationKey, u64>,
    /// Buffered payloads awaiting batch flush.
    pub(crate) messages: HashMap<MessageId, MessagePayload>,
}

/// Outcome of classifying one intake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Classification {
    /// Below the rate limit; send immediately.
    SendNow,
    /// Key already aggregating; message joined the pending batch.
    Buffered,
    /// This message pushed the key over the threshold and started
    /// aggregation mode.
    EnteredAggregation,
}

/// Classify a message under its key at `now`, updating the state.
pub(crate) fn classify(
    state: &mut AggState,
    message: &MessagePayload,
    key: &AggregationKey,
    plan: &Plan,
    now: u64,
) -> Classification {
    let Some(message_id) = message.message_id else {
        // Nothing to buffer without a row id; bursts of id-less messages
        // cannot be re-polled so they always go straight out.
        return Classification::SendNow;
    };

    if let Some(last) = state.aggregation.get(key).copied() {
        if now.saturating_sub(last) > plan.aggregation_reset {
            // Long enough since the last aggregated message: return to
            // immediate sending and clear the flush tracker.
            state.aggregation.remove(key);
            state.sent.remove(key);
        } else {
            state.aggregation.insert(key.clone(), now);
            state.queues.entry(key.clone()).or_default().insert(message_id);
            state.messages.insert(message_id, message.clone());
            return Classification::Buffered;
        }
    }

    let window = state.windows.entry(key.clone()).or_default();
    window.retain(|bucket, _| now.saturating_sub(*bucket) <= plan.threshold_window);
    *window.entry(now).or_insert(0) += 1;

    if window.values().sum::<u64>() > plan.threshold_count {
        state.queues.insert(key.clone(), HashSet::from([message_id]));
        state.messages.insert(message_id, message.clone());
        state.sent.insert(key.clone(), now);
        state.aggregation.insert(key.clone(), now);
        Classification::EnteredAggregation
    } else {
        Classification::SendNow
    }
}

/// Apply a batch flush for one key given the still-active subset of its
/// queued ids. Returns the payload to enqueue, if any.
pub(crate) fn apply_flush(
    state: &mut AggState,
    key: &AggregationKey,
    queued: &[MessageId],
    active: &HashSet<MessageId>,
    now: u64,
) -> Option<MessagePayload> {
    for id in queued.iter().filter(|id| !active.contains(id)) {
        state.messages.remove(id);
    }

    let result = if active.len() == 1 {
        // A single survivor goes out as a normal message, no batch.
        let id = *active.iter().next().expect("len checked");
        state.messages.remove(&id)
    } else if active.len() > 1 {
        let mut ids: Vec<MessageId> = active.iter().copied().collect();
        ids.sort_unstable();
        let representative = state.messages.remove(&ids[0]);
        for id in &ids[1..] {
            state.messages.remove(id);
        }
        representative.map(|mut m| {
            m.batch_id = Some(Uuid::new_v4().simple().to_string());
            m.aggregated_ids = ids;
            m
        })
    } else {
        None
    };

    state.queues.remove(key);
    state.sent.insert(key.clone(), now);
    result
}

/// The aggregation engine: classification, batching, and the unsent poll.
pub struct AggregationEngine {
    state: Mutex<AggState>,
    db: Db,
    cache: Arc<Cache>,
    audit: AuditLog,
    send_tx: UnboundedSender<MessagePayload>,
    intake_tx: UnboundedSender<MessagePayload>,
    intake_rx: Arc<tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<MessagePayload>>>,
}

impl AggregationEngine {
    #[must_use]
    pub fn new(
        db: Db,
        cache: Arc<Cache>,
        audit: AuditLog,
        send_tx: UnboundedSender<MessagePayload>,
    ) -> Self {
        let (intake_tx, intake_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            state: Mutex::new(AggState::default()),
            db,
            cache,
            audit,
            send_tx,
            intake_tx,
            intake_rx: Arc::new(tokio::sync::Mutex::new(intake_rx)),
        }
    }

    /// Spawn the intake task draining the intake queue into the classifier.
    ///
    /// The receiver is shared, so a crashed task can be replaced by calling
    /// this again.
    pub fn spawn_intake(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let message = { engine.intake_rx.lock().await.recv().await };
                let Some(message) = message else { break };
                engine.intake(message, crate::unix_now()).await;
            }
        })
    }

    /// Classify one message: straight to the send queue, or buffered.
    pub async fn intake(&self, message: MessagePayload, now: u64) {
        let Some(key) = message.aggregation_key() else {
            // Out-of-band messages bypass aggregation entirely.
            let _ = self.send_tx.send(message);
            return;
        };
        let Some(plan) = self.cache.plan(key.plan_id) else {
            warn!(plan_id = key.plan_id, "message for unknown plan, sending unaggregated");
            let _ = self.send_tx.send(message);
            return;
        };

        let message_id = message.message_id;
        let classification = {
            let mut state = self.state.lock();
            classify(&mut state, &message, &key, &plan, now)
        };
        match classification {
            Classification::SendNow => {
                let _ = self.send_tx.send(message);
            }
            Classification::Buffered => {
                debug!(?message_id, %key, "buffered into pending batch");
            }
            Classification::EnteredAggregation => {
                info!(?message_id, %key, "rate threshold exceeded, aggregating");
                if let Some(message_id) = message_id {
                    self.audit
                        .message_change(
                            message_id,
                            ChangeType::SentChange,
                            "",
                            "",
                            &format!("Aggregated with key {key}"),
                        )
                        .await;
                }
            }
        }
    }

    /// Flush every key whose aggregation window has elapsed.
    pub async fn flush(&self, now: u64) -> Result<(), SenderError> {
        let candidates: Vec<(AggregationKey, Vec<MessageId>, u64)> = {
            let state = self.state.lock();
            state
                .queues
                .iter()
                .map(|(key, ids)| {
                    (
                        key.clone(),
                        ids.iter().copied().collect(),
                        state.sent.get(key).copied().unwrap_or(0),
                    )
                })
                .collect()
        };

        for (key, queued, last_sent) in candidates {
            let window = self
                .cache
                .plan(key.plan_id)
                .map_or(0, |plan| plan.aggregation_window);
            if now.saturating_sub(last_sent) < window {
                continue;
            }

            let active = self.db.active_message_ids(&queued).await?;
            info!(
                %key,
                dropped = queued.len() - active.len(),
                remaining = active.len(),
                "flushing aggregation key"
            );

            let to_send = {
                let mut state = self.state.lock();
                apply_flush(&mut state, &key, &queued, &active, now)
            };
            if let Some(message) = to_send {
                let _ = self.send_tx.send(message);
            }
        }
        Ok(())
    }

    /// Read unsent messages (excluding buffered ids) onto the intake queue.
    pub async fn poll(&self) -> Result<usize, SenderError> {
        let exclude: Vec<MessageId> = {
            let state = self.state.lock();
            state.messages.keys().copied().collect()
        };
        let rows = self.db.unsent_messages(&exclude).await?;
        let count = rows.len();
        debug!(new = count, buffered = exclude.len(), "unsent message poll");

        for row in rows {
            let mut message = row.into_payload();
            message.inject_context_meta();
            self.intake_tx
                .send(message)
                .map_err(|_| SenderError::QueueClosed)?;
        }
        Ok(count)
    }

    /// Message ids currently buffered (exposed for maintenance logging).
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.state.lock().messages.len()
    }
}
