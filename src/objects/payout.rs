use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Meta, object_identity, send};
use crate::error::HubError;
use crate::hub::{Hub, Retain, Subscription};
use crate::model::{Address, Bid, BidList, PayoutData};

enum Command {
    Data(PayoutData),
    Bids(BidList),
    Close,
}

/// Payout object: account data, the current bid list and per-bidder changes.
///
/// Bid lists are replaced wholesale on every update. A bid equal to the one
/// already held for the same bidder keeps its `Arc`, so `bidders` only carries
/// new or changed bids, and a list identical to the previous one is not
/// republished.
#[derive(Clone, Debug)]
pub struct Payout {
    meta: Meta,
    tx: mpsc::Sender<Command>,
    data: Hub<Arc<PayoutData>>,
    bids: Hub<Arc<BidList>>,
    bidders: Hub<Arc<Bid>>,
}

object_identity!(Payout);

struct Hubs {
    data: Hub<Arc<PayoutData>>,
    bids: Hub<Arc<BidList>>,
    bidders: Hub<Arc<Bid>>,
}

impl Payout {
    pub(crate) fn spawn(
        address: Address,
        instance: u64,
        data: PayoutData,
        buffer: usize,
        parent: &CancellationToken,
    ) -> Self {
        let meta = Meta::new(address, instance, parent);
        let hubs = Hubs {
            data: Hub::spawn(Retain::Latest, buffer, &meta.closed),
            bids: Hub::spawn(Retain::Latest, buffer, &meta.closed),
            bidders: Hub::spawn(Retain::None, buffer, &meta.closed),
        };
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let this = Self {
            meta: meta.clone(),
            tx,
            data: hubs.data.clone(),
            bids: hubs.bids.clone(),
            bidders: hubs.bidders.clone(),
        };
        tokio::spawn(run(rx, data, hubs, meta));
        this
    }

    pub async fn data(&self) -> Result<Subscription<Arc<PayoutData>>, HubError> {
        self.data.subscribe().await
    }

    /// Subscribes to whole bid lists, starting with the current one if any.
    pub async fn bids(&self) -> Result<Subscription<Arc<BidList>>, HubError> {
        self.bids.subscribe().await
    }

    /// Subscribes to bids that are new or changed since the previous list.
    pub async fn bidders(&self) -> Result<Subscription<Arc<Bid>>, HubError> {
        self.bidders.subscribe().await
    }

    pub async fn update(&self, data: PayoutData) -> bool {
        send(&self.tx, &self.meta.closed, Command::Data(data)).await
    }

    pub async fn update_bids(&self, list: BidList) -> bool {
        send(&self.tx, &self.meta.closed, Command::Bids(list)).await
    }

    pub async fn close(&self) {
        send(&self.tx, &self.meta.closed, Command::Close).await;
    }
}

async fn run(mut rx: mpsc::Receiver<Command>, data: PayoutData, hubs: Hubs, meta: Meta) {
    let mut next = Some(data);
    let mut last_bids: Option<Arc<BidList>> = None;
    loop {
        if let Some(data) = next.take() {
            if data.balance == 0 {
                debug!(address = %meta.address, "payout balance reached zero");
                break;
            }
            if hubs.data.broadcast(Arc::new(data)).await.is_err() {
                break;
            }
        }
        let cmd = tokio::select! {
            _ = meta.closed.cancelled() => break,
            cmd = rx.recv() => cmd,
        };
        match cmd {
            Some(Command::Data(data)) => next = Some(data),
            Some(Command::Bids(list)) => {
                let Some((list, changed)) = merge_bids(last_bids.as_deref(), list) else {
                    continue;
                };
                let list = Arc::new(list);
                last_bids = Some(list.clone());
                if hubs.bids.broadcast(list).await.is_err() {
                    break;
                }
                for bid in changed {
                    if hubs.bidders.broadcast(bid).await.is_err() {
                        break;
                    }
                }
            }
            Some(Command::Close) | None => break,
        }
    }
    hubs.data.close().await;
    hubs.bids.close().await;
    hubs.bidders.close().await;
    meta.closed.cancel();
}

/// Reuses unchanged bid entries from `prev`.
///
/// Returns `None` when `list` is identical to `prev`, otherwise the merged list
/// and the bids that are new or changed.
fn merge_bids(prev: Option<&BidList>, mut list: BidList) -> Option<(BidList, Vec<Arc<Bid>>)> {
    if prev.is_some_and(|p| *p == list) {
        return None;
    }
    let known: HashMap<Address, &Arc<Bid>> = prev
        .map(|p| p.active().map(|b| (b.bidder, b)).collect())
        .unwrap_or_default();

    let mut changed = Vec::new();
    for slot in list.bids.iter_mut().flatten() {
        match known.get(&slot.bidder) {
            Some(old) if **old == *slot => *slot = Arc::clone(old),
            _ => changed.push(Arc::clone(slot)),
        }
    }
    Some((list, changed))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::model::Period;

    fn bid(who: u8, deposit: u64) -> Option<Bid> {
        Some(Bid {
            bidder: Address::repeat(who),
            deposit,
            bandwidth: 1,
        })
    }

    fn data(balance: u64) -> PayoutData {
        PayoutData {
            pipeline: Address::repeat(1),
            period: Period::new(100, 50),
            balance,
            validator_count: 0,
            staker_count: 0,
        }
    }

    #[test]
    fn merge_reuses_unchanged_bidders() {
        let payout = Address::repeat(7);
        let first = BidList::new(payout, false, vec![bid(1, 10), None, bid(2, 20)]);
        let (first, changed) = merge_bids(None, first).unwrap();
        assert_eq!(changed.len(), 2);

        let second = BidList::new(payout, false, vec![bid(1, 10), bid(3, 5), bid(2, 25)]);
        let (second, changed) = merge_bids(Some(&first), second).unwrap();
        let changed: Vec<_> = changed.iter().map(|b| b.bidder).collect();
        assert_eq!(changed, vec![Address::repeat(3), Address::repeat(2)]);

        let old = first.bids[0].as_ref().unwrap();
        let new = second.bids[0].as_ref().unwrap();
        assert!(Arc::ptr_eq(old, new));

        let same = BidList::new(payout, false, vec![bid(1, 10), bid(3, 5), bid(2, 25)]);
        assert!(merge_bids(Some(&second), same).is_none());
    }

    #[tokio::test]
    async fn bids_and_changed_bidders_published() {
        let root = CancellationToken::new();
        let addr = Address::repeat(7);
        let payout = Payout::spawn(addr, 0, data(10), 8, &root);
        let mut lists = payout.bids().await.unwrap();
        let mut bidders = payout.bidders().await.unwrap();

        payout
            .update_bids(BidList::new(addr, false, vec![bid(1, 10)]))
            .await;
        payout
            .update_bids(BidList::new(addr, true, vec![bid(1, 10), bid(2, 3)]))
            .await;

        let wait = Duration::from_secs(5);
        let a = timeout(wait, lists.recv()).await.unwrap().unwrap().unwrap();
        let b = timeout(wait, lists.recv()).await.unwrap().unwrap().unwrap();
        assert!(!a.is_final);
        assert!(b.is_final);

        let first = timeout(wait, bidders.recv()).await.unwrap().unwrap().unwrap();
        let second = timeout(wait, bidders.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(first.bidder, Address::repeat(1));
        assert_eq!(second.bidder, Address::repeat(2));
    }

    #[tokio::test]
    async fn zero_balance_closes_payout() {
        let root = CancellationToken::new();
        let payout = Payout::spawn(Address::repeat(7), 0, data(10), 4, &root);
        payout.update(data(0)).await;
        timeout(Duration::from_secs(5), payout.closed()).await.unwrap();
        assert!(payout.bids().await.is_err());
    }
}
