use crate::types::RelayerError;
use alloy_primitives::{Address, U256};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One signed change to a ledger entry, used for atomic batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    Credit { owner: Address, token: Address, amount: U256 },
    Debit { owner: Address, token: Address, amount: U256 },
}

/// Custodial balances keyed by (owner, token).
///
/// Every operation takes the lock for a synchronous critical section only, so
/// callers can never hold it across a chain round-trip.
#[derive(Debug, Default)]
pub struct BalanceLedger {
    balances: RwLock<HashMap<(Address, Address), U256>>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, owner: Address, token: Address, amount: U256) {
        let mut balances = self.balances.write();
        credit_entry(&mut balances, owner, token, amount);
    }

    /// Decrease by exactly `amount`, or reject and leave the entry untouched.
    pub fn debit(&self, owner: Address, token: Address, amount: U256) -> Result<U256, RelayerError> {
        let mut balances = self.balances.write();
        let available = balances.get(&(owner, token)).copied().unwrap_or(U256::ZERO);
        let remaining = available
            .checked_sub(amount)
            .ok_or(RelayerError::InsufficientBalance {
                owner,
                token,
                required: amount,
                available,
            })?;

        balances.insert((owner, token), remaining);
        debug!("Debited {} {} from {}: {} -> {}", amount, token, owner, available, remaining);
        Ok(remaining)
    }

    pub fn balance_of(&self, owner: Address, token: Address) -> U256 {
        self.balances
            .read()
            .get(&(owner, token))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn balances_of(&self, owner: Address) -> HashMap<Address, U256> {
        self.balances
            .read()
            .iter()
            .filter(|((entry_owner, _), _)| *entry_owner == owner)
            .map(|((_, token), amount)| (*token, *amount))
            .collect()
    }

    /// Check that every (owner, token) key can cover the summed debits against it.
    pub fn ensure_covers(&self, debits: &[(Address, Address, U256)]) -> Result<(), RelayerError> {
        let balances = self.balances.read();
        for (owner, token, required) in aggregate(debits.iter().copied()) {
            let available = balances.get(&(owner, token)).copied().unwrap_or(U256::ZERO);
            if available < required {
                return Err(RelayerError::InsufficientBalance {
                    owner,
                    token,
                    required,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Apply a batch all-or-nothing: debits are re-validated under the same
    /// write lock that applies them.
    pub fn apply(&self, changes: &[BalanceChange]) -> Result<(), RelayerError> {
        let mut balances = self.balances.write();

        let debits = changes.iter().filter_map(|change| match *change {
            BalanceChange::Debit { owner, token, amount } => Some((owner, token, amount)),
            BalanceChange::Credit { .. } => None,
        });
        for (owner, token, required) in aggregate(debits) {
            let available = balances.get(&(owner, token)).copied().unwrap_or(U256::ZERO);
            if available < required {
                return Err(RelayerError::InsufficientBalance {
                    owner,
                    token,
                    required,
                    available,
                });
            }
        }

        // Debits first so an owner's credit in the same token cannot fund its own debit.
        for change in changes {
            if let BalanceChange::Debit { owner, token, amount } = *change {
                let entry = balances.entry((owner, token)).or_insert(U256::ZERO);
                *entry -= amount;
            }
        }
        for change in changes {
            if let BalanceChange::Credit { owner, token, amount } = *change {
                credit_entry(&mut balances, owner, token, amount);
            }
        }

        Ok(())
    }
}

fn credit_entry(
    balances: &mut HashMap<(Address, Address), U256>,
    owner: Address,
    token: Address,
    amount: U256,
) {
    let entry = balances.entry((owner, token)).or_insert(U256::ZERO);
    let before = *entry;
    *entry = before.checked_add(amount).unwrap_or_else(|| {
        warn!("Balance of {} in {} saturated at U256::MAX", owner, token);
        U256::MAX
    });
    debug!("Credited {} {} to {}: {} -> {}", amount, token, owner, before, *entry);
}

/// Sum amounts per (owner, token), keeping first-seen order.
fn aggregate(
    items: impl Iterator<Item = (Address, Address, U256)>,
) -> Vec<(Address, Address, U256)> {
    let mut totals: Vec<(Address, Address, U256)> = Vec::new();
    for (owner, token, amount) in items {
        match totals.iter_mut().find(|(o, t, _)| *o == owner && *t == token) {
            Some((_, _, total)) => *total = total.saturating_add(amount),
            None => totals.push((owner, token, amount)),
        }
    }
    totals
}
