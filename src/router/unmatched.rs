//! Unmatched queue: holds updates whose parent object does not exist yet.
//!
//! When an update arrives referencing a parent the router has not created,
//! it is stored here keyed by the missing parent's address. Once that parent
//! is created, every waiting update is drained in arrival order and re-applied.

use std::collections::HashMap;

use crate::model::{Address, AccountUpdate};

/// Forward references keyed by the missing parent.
#[derive(Default)]
pub(crate) struct Unmatched {
    waiting: HashMap<Address, Vec<AccountUpdate>>,
    count: usize,
}

impl Unmatched {
    /// Parks `update` until `parent` is created.
    pub(crate) fn insert(&mut self, parent: Address, update: AccountUpdate) {
        self.waiting.entry(parent).or_default().push(update);
        self.count += 1;
    }

    /// Drains everything that was waiting for `parent`, oldest first.
    pub(crate) fn take(&mut self, parent: &Address) -> Vec<AccountUpdate> {
        match self.waiting.remove(parent) {
            Some(updates) => {
                self.count -= updates.len();
                updates
            }
            None => Vec::new(),
        }
    }

    /// Drops every queued update for the account `child`, under any parent.
    ///
    /// Returns how many entries were removed.
    pub(crate) fn discard_child(&mut self, child: &Address) -> usize {
        let mut removed = 0;
        self.waiting.retain(|_, updates| {
            let before = updates.len();
            updates.retain(|u| u.address != *child);
            removed += before - updates.len();
            !updates.is_empty()
        });
        self.count -= removed;
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountPayload, BidList};

    fn bids(address: u8, payout: u8, is_final: bool) -> AccountUpdate {
        let payout = Address::repeat(payout);
        AccountUpdate::open(
            Address::repeat(address),
            AccountPayload::BidList(BidList::new(payout, is_final, vec![])),
        )
    }

    #[test]
    fn take_preserves_arrival_order() {
        let mut q = Unmatched::default();
        q.insert(Address::repeat(9), bids(1, 9, false));
        q.insert(Address::repeat(9), bids(1, 9, true));
        q.insert(Address::repeat(8), bids(2, 8, false));
        assert_eq!(q.len(), 3);

        let drained = q.take(&Address::repeat(9));
        assert_eq!(drained, vec![bids(1, 9, false), bids(1, 9, true)]);
        assert_eq!(q.len(), 1);
        assert!(q.take(&Address::repeat(9)).is_empty());
    }

    #[test]
    fn discard_child_across_parents() {
        let mut q = Unmatched::default();
        q.insert(Address::repeat(9), bids(1, 9, false));
        q.insert(Address::repeat(8), bids(1, 8, false));
        q.insert(Address::repeat(8), bids(2, 8, false));

        assert_eq!(q.discard_child(&Address::repeat(1)), 2);
        assert_eq!(q.len(), 1);
        assert!(q.take(&Address::repeat(9)).is_empty());
        assert_eq!(q.take(&Address::repeat(8)).len(), 1);
    }
}
