use crate::types::MatchNotification;
use alloy_primitives::Address;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Completed matches, indexed by each participating owner.
#[derive(Debug, Default)]
pub struct NotificationStore {
    by_owner: RwLock<HashMap<Address, Vec<MatchNotification>>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store under both owners; an owner matching against itself gets one copy.
    pub fn record(&self, notification: MatchNotification) {
        let first = notification.matched_intents.intent1.owner;
        let second = notification.matched_intents.intent2.owner;

        let mut by_owner = self.by_owner.write();
        if first != second {
            by_owner.entry(second).or_default().push(notification.clone());
        }
        by_owner.entry(first).or_default().push(notification);
    }

    /// Snapshot in recording order.
    pub fn for_owner(&self, owner: Address) -> Vec<MatchNotification> {
        self.by_owner.read().get(&owner).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Intent, SettlementReceipt, TransactionHash};
    use alloy_primitives::{B256, U256};
    use chrono::{Duration, Utc};

    fn notification(owner1: u8, owner2: u8, tag: u8) -> MatchNotification {
        let now = Utc::now();
        let x = Address::repeat_byte(0xaa);
        let y = Address::repeat_byte(0xbb);
        let expiry = now + Duration::minutes(1);
        MatchNotification::new(
            Intent::new(Address::repeat_byte(owner1), x, y, U256::from(1u64), U256::from(2u64), expiry, now),
            Intent::new(Address::repeat_byte(owner2), y, x, U256::from(2u64), U256::from(1u64), expiry, now),
            SettlementReceipt {
                first_leg: TransactionHash(B256::repeat_byte(tag)),
                second_leg: TransactionHash(B256::repeat_byte(tag + 1)),
            },
        )
    }

    #[test]
    fn test_recorded_for_both_owners() {
        let store = NotificationStore::new();
        store.record(notification(1, 2, 0x10));

        let alice = store.for_owner(Address::repeat_byte(1));
        let bob = store.for_owner(Address::repeat_byte(2));
        assert_eq!(alice.len(), 1);
        assert_eq!(bob.len(), 1);
        assert_eq!(alice[0].receipt, bob[0].receipt);
    }

    #[test]
    fn test_snapshot_in_recording_order() {
        let store = NotificationStore::new();
        store.record(notification(1, 2, 0x10));
        store.record(notification(1, 3, 0x20));

        let snapshot = store.for_owner(Address::repeat_byte(1));
        store.record(notification(1, 4, 0x30));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].receipt.first_leg, TransactionHash(B256::repeat_byte(0x10)));
        assert_eq!(snapshot[1].receipt.first_leg, TransactionHash(B256::repeat_byte(0x20)));
        assert_eq!(store.for_owner(Address::repeat_byte(1)).len(), 3);
    }

    #[test]
    fn test_self_match_stored_once() {
        let store = NotificationStore::new();
        store.record(notification(7, 7, 0x10));
        assert_eq!(store.for_owner(Address::repeat_byte(7)).len(), 1);
        assert!(store.for_owner(Address::repeat_byte(8)).is_empty());
    }
}
