//! Target contact resolution with mode fallback and reprioritization.

use std::sync::Arc;

use klaxon_core::MessagePayload;
use klaxon_db::Db;
use tracing::{error, info, warn};

use crate::cache::Cache;
use crate::error::SenderError;

/// Resolves a message's delivery mode and destination.
pub struct ContactResolver {
    db: Db,
    cache: Arc<Cache>,
    fallback_mode: String,
}

impl ContactResolver {
    #[must_use]
    pub fn new(db: Db, cache: Arc<Cache>, fallback_mode: impl Into<String>) -> Self {
        Self {
            db,
            cache,
            fallback_mode: fallback_mode.into(),
        }
    }

    /// The configured fallback mode name.
    #[must_use]
    pub fn fallback_mode(&self) -> &str {
        &self.fallback_mode
    }

    /// Resolve mode and destination in place.
    ///
    /// Out-of-band messages arrive with their mode pre-set and only need a
    /// destination; incident messages run the application-specific ->
    /// user-default -> priority-default cascade. Either way a missing
    /// contact falls back to the configured fallback mode, and a resolved
    /// contact is then subject to reprioritization.
    ///
    /// Returns `false` when no contact could be found at all; the caller
    /// deactivates the message.
    pub async fn resolve(&self, message: &mut MessagePayload) -> Result<bool, SenderError> {
        let resolved = if let Some(mode_id) = message.mode_id {
            match self.db.contact_for_mode_id(&message.target, mode_id).await? {
                Some(destination) => {
                    message.destination = Some(destination);
                    true
                }
                None => false,
            }
        } else if let Some(mode) = message.mode.clone() {
            // Mode name without an id: the API accepted a named mode.
            self.resolve_for_mode(message, &mode).await?
        } else {
            match self
                .db
                .contact_by_priority(&message.target, &message.application, message.priority_id)
                .await?
            {
                Some(contact) => {
                    message.destination = Some(contact.destination);
                    message.mode = Some(contact.mode);
                    message.mode_id = Some(contact.mode_id);
                    true
                }
                None => false,
            }
        };

        if !resolved {
            warn!(
                target = %message.target,
                mode = ?message.mode,
                "target has no contact for resolved mode, trying fallback"
            );
            return self.apply_fallback(message).await;
        }

        self.reprioritize(message).await?;
        Ok(true)
    }

    /// Force the fallback mode onto the message.
    ///
    /// On failure the mode fields are cleared and `false` returned; the
    /// dispatcher deactivates the message.
    pub async fn apply_fallback(&self, message: &mut MessagePayload) -> Result<bool, SenderError> {
        match self
            .db
            .contact_for_mode_name(&message.target, &self.fallback_mode)
            .await?
        {
            Some(contact) => {
                message.destination = Some(contact.destination);
                message.mode = Some(contact.mode);
                message.mode_id = Some(contact.mode_id);
                Ok(true)
            }
            None => {
                error!(
                    target = %message.target,
                    fallback = %self.fallback_mode,
                    "target has no fallback contact either"
                );
                message.destination = None;
                message.mode = None;
                message.mode_id = None;
                Ok(false)
            }
        }
    }

    async fn resolve_for_mode(
        &self,
        message: &mut MessagePayload,
        mode: &str,
    ) -> Result<bool, SenderError> {
        match self.db.contact_for_mode_name(&message.target, mode).await? {
            Some(contact) => {
                message.destination = Some(contact.destination);
                message.mode = Some(contact.mode);
                message.mode_id = Some(contact.mode_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rewrite the mode when a reprioritization rule has accumulated enough
    /// recent sends, re-resolving the destination for the new mode.
    async fn reprioritize(&self, message: &mut MessagePayload) -> Result<(), SenderError> {
        let Some(mode) = message.mode.clone() else {
            return Ok(());
        };
        let Some(dst_mode) = self.cache.note_send_and_check_reprioritization(
            &message.target,
            &mode,
            crate::unix_now(),
        ) else {
            return Ok(());
        };

        match self
            .db
            .contact_for_mode_name(&message.target, &dst_mode)
            .await?
        {
            Some(contact) => {
                info!(
                    target = %message.target,
                    from = %mode,
                    to = %dst_mode,
                    "reprioritization rule rewrote mode"
                );
                message.destination = Some(contact.destination);
                message.mode = Some(contact.mode);
                message.mode_id = Some(contact.mode_id);
            }
            None => {
                // No contact under the destination mode: deliver via the
                // original resolution rather than dropping the message.
                warn!(
                    target = %message.target,
                    dst_mode = %dst_mode,
                    "reprioritization destination mode has no contact, keeping original"
                );
            }
        }
        Ok(())
    }
}
