//! In-memory store of pending challenges, keyed by participant id.
//!
//! The store enforces one live record per participant (`create` is create-if-absent)
//! and makes `remove` idempotent: the caller that gets the record back owns its
//! resolution, everyone else gets `None`.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{MessageId, ParticipantId, PendingChallenge};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("participant {0} already has a pending challenge")]
    DuplicateChallenge(ParticipantId),

    #[error("no pending challenge for participant {0}")]
    NotFound(ParticipantId),
}

#[derive(Clone, Default)]
pub struct ChallengeStore {
    by_participant: Arc<RwLock<HashMap<ParticipantId, PendingChallenge>>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(level = "debug", skip(self, record), fields(participant = record.participant.id))]
    pub async fn create(&self, record: PendingChallenge) -> Result<(), StoreError> {
        let mut map = self.by_participant.write().await;
        let id = record.participant.id;
        if map.contains_key(&id) {
            return Err(StoreError::DuplicateChallenge(id));
        }
        map.insert(id, record);
        Ok(())
    }

    pub async fn get(&self, id: ParticipantId) -> Option<PendingChallenge> {
        self.by_participant.read().await.get(&id).cloned()
    }

    #[allow(dead_code)]
    pub async fn set_attempts(&self, id: ParticipantId, remaining: u32) -> Result<(), StoreError> {
        let mut map = self.by_participant.write().await;
        let record = map.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.remaining_attempts = remaining;
        Ok(())
    }

    /// Take one attempt away under the write lock and return what is left (floor 0).
    pub async fn decrement_attempts(&self, id: ParticipantId) -> Result<u32, StoreError> {
        let mut map = self.by_participant.write().await;
        let record = map.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.remaining_attempts = record.remaining_attempts.saturating_sub(1);
        Ok(record.remaining_attempts)
    }

    pub async fn append_messages(&self, id: ParticipantId, ids: &[MessageId]) -> Result<(), StoreError> {
        let mut map = self.by_participant.write().await;
        let record = map.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.tracked_messages.extend_from_slice(ids);
        Ok(())
    }

    /// Remove and return the record. Absent ids are a no-op.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, id: ParticipantId) -> Option<PendingChallenge> {
        let removed = self.by_participant.write().await.remove(&id);
        if removed.is_none() {
            debug!(target: "captcha", participant = id, "Remove on absent record (already resolved)");
        }
        removed
    }

    /// Remove the record only if it is the one identified by `token`.
    pub async fn remove_if_token(&self, id: ParticipantId, token: Uuid) -> Option<PendingChallenge> {
        let mut map = self.by_participant.write().await;
        match map.get(&id) {
            Some(record) if record.token == token => map.remove(&id),
            _ => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.by_participant.read().await.len()
    }
}
