use crate::types::Intent;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Submitted intents in insertion order. Insertion order is match precedence.
#[derive(Debug, Default)]
pub struct IntentBook {
    intents: RwLock<Vec<Intent>>,
}

impl IntentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the submission instant and append. Always accepted.
    pub fn submit(&self, mut intent: Intent, now: DateTime<Utc>) -> Intent {
        intent.submitted_at = now;
        self.intents.write().push(intent.clone());
        debug!("Intent {} added to book", intent.id);
        intent
    }

    pub fn active_intents(&self, now: DateTime<Utc>) -> Vec<Intent> {
        self.intents
            .read()
            .iter()
            .filter(|intent| intent.is_active_at(now))
            .cloned()
            .collect()
    }

    /// Drop intents whose expiry has passed; returns how many were dropped.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut intents = self.intents.write();
        let before = intents.len();
        intents.retain(|intent| intent.is_active_at(now));
        let swept = before - intents.len();

        if swept > 0 {
            info!("Cleaned up {} expired intents", swept);
        }
        swept
    }

    pub fn by_owner(&self, owner: Address) -> Vec<Intent> {
        self.intents
            .read()
            .iter()
            .filter(|intent| intent.owner == owner)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Intent> {
        self.intents.read().clone()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.intents.read().iter().any(|intent| intent.id == id)
    }

    /// Remove the given intents; returns how many were present.
    pub fn remove(&self, ids: &[Uuid]) -> usize {
        let mut intents = self.intents.write();
        let before = intents.len();
        intents.retain(|intent| !ids.contains(&intent.id));
        before - intents.len()
    }

    pub fn len(&self) -> usize {
        self.intents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.read().is_empty()
    }
}
