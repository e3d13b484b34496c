use std::sync::Arc;

use super::Address;

/// A single bidder's stake against a payout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bid {
    pub bidder: Address,
    pub deposit: u64,
    pub bandwidth: u64,
}

/// Full set of active bids against one payout.
///
/// Slots are `None` when blank. The router produces [`BidList::blank`] once the
/// bid-list account closes; schedulers read that as "bids have closed".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BidList {
    pub payout: Address,
    pub is_final: bool,
    pub bids: Vec<Option<Arc<Bid>>>,
    closed: bool,
}

impl BidList {
    pub fn new(payout: Address, is_final: bool, bids: Vec<Option<Bid>>) -> Self {
        Self {
            payout,
            is_final,
            bids: bids.into_iter().map(|b| b.map(Arc::new)).collect(),
            closed: false,
        }
    }

    /// The zero sentinel for a closed bid-list account.
    pub fn blank(payout: Address) -> Self {
        Self {
            payout,
            is_final: true,
            bids: Vec::new(),
            closed: true,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.closed
    }

    /// Iterates the non-blank bids.
    pub fn active(&self) -> impl Iterator<Item = &Arc<Bid>> {
        self.bids.iter().flatten()
    }
}
