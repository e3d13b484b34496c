//! Router: the authoritative object graph.
//!
//! The router ingests account updates in any order and keeps one live object
//! per on-chain account. Consumers never see the maps: they look objects up by
//! address or subscribe to creation hubs.
//!
//! ## Contents
//! - [`Router`] handle (`update`, `*_by_id` lookups, `on_*` creation hubs, `pending`)
//! - [`Object`] any live object returned by a lookup
//!
//! ## Failure semantics
//! A malformed payload or an address observed as two different kinds stops
//! the router; the error is returned once through the [`JoinHandle`] from
//! [`Router::spawn`]. Every object is cancelled with it. Lookups of absent
//! objects return [`RouterError::NotFound`] and never affect the router.

mod actor;
mod unmatched;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use actor::{Request, RouterActor};

use crate::error::{HubError, RouterError};
use crate::events::Bus;
use crate::hub::{Hub, Retain, Subscription};
use crate::model::{
    AccountPayload, AccountUpdate, Address, BidList, Kind, PeriodRing, PipelineData,
};
use crate::objects::{Payout, Pipeline, Receipt, Staker, Validator};

/// Any live object.
#[derive(Clone, Debug)]
pub enum Object {
    Pipeline(Pipeline),
    Payout(Payout),
    Receipt(Receipt),
    Staker(Staker),
    Validator(Validator),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Pipeline(_) => Kind::Pipeline,
            Object::Payout(_) => Kind::Payout,
            Object::Receipt(_) => Kind::Receipt,
            Object::Staker(_) => Kind::Staker,
            Object::Validator(_) => Kind::Validator,
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Object::Pipeline(o) => o.address(),
            Object::Payout(o) => o.address(),
            Object::Receipt(o) => o.address(),
            Object::Staker(o) => o.address(),
            Object::Validator(o) => o.address(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Object::Pipeline(o) => o.is_closed(),
            Object::Payout(o) => o.is_closed(),
            Object::Receipt(o) => o.is_closed(),
            Object::Staker(o) => o.is_closed(),
            Object::Validator(o) => o.is_closed(),
        }
    }
}

/// Creation hubs, one per object kind.
#[derive(Clone, Debug)]
pub(crate) struct Creations {
    pub(crate) pipelines: Hub<Pipeline>,
    pub(crate) payouts: Hub<Payout>,
    pub(crate) receipts: Hub<Receipt>,
    pub(crate) stakers: Hub<Staker>,
    pub(crate) validators: Hub<Validator>,
}

impl Creations {
    fn spawn(buffer: usize, parent: &CancellationToken) -> Self {
        Self {
            pipelines: Hub::spawn(Retain::None, buffer, parent),
            payouts: Hub::spawn(Retain::None, buffer, parent),
            receipts: Hub::spawn(Retain::None, buffer, parent),
            stakers: Hub::spawn(Retain::None, buffer, parent),
            validators: Hub::spawn(Retain::None, buffer, parent),
        }
    }

    async fn close(&self) {
        self.pipelines.close().await;
        self.payouts.close().await;
        self.receipts.close().await;
        self.stakers.close().await;
        self.validators.close().await;
    }
}

/// Handle to the router actor. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Router {
    tx: mpsc::Sender<Request>,
    hubs: Creations,
    token: CancellationToken,
}

impl Router {
    /// Spawns the router actor.
    ///
    /// `buffer` sizes the request queue and every hub the router or its objects own.
    pub fn spawn(
        buffer: usize,
        bus: Bus,
        parent: &CancellationToken,
    ) -> (Self, JoinHandle<Result<(), RouterError>>) {
        let buffer = buffer.max(1);
        let token = parent.child_token();
        let hubs = Creations::spawn(buffer, &token);
        let (tx, rx) = mpsc::channel(buffer);
        let actor = RouterActor::new(buffer, token.clone(), bus, hubs.clone());
        let handle = tokio::spawn(actor.run(rx));
        (Self { tx, hubs, token }, handle)
    }

    /// Queues one account update.
    pub async fn update(&self, update: AccountUpdate) -> Result<(), RouterError> {
        self.request(Request::Update(update)).await
    }

    pub async fn add_pipeline(&self, address: Address, data: PipelineData) -> Result<(), RouterError> {
        self.update(AccountUpdate::open(address, AccountPayload::Pipeline(data)))
            .await
    }

    pub async fn add_period(&self, address: Address, ring: PeriodRing) -> Result<(), RouterError> {
        self.update(AccountUpdate::open(address, AccountPayload::PeriodRing(ring)))
            .await
    }

    pub async fn add_bid(&self, address: Address, list: BidList) -> Result<(), RouterError> {
        self.update(AccountUpdate::open(address, AccountPayload::BidList(list)))
            .await
    }

    pub async fn pipeline_by_id(&self, address: Address) -> Result<Pipeline, RouterError> {
        match self.lookup(Kind::Pipeline, address).await? {
            Object::Pipeline(o) => Ok(o),
            _ => Err(RouterError::NotFound {
                kind: Kind::Pipeline,
                address,
            }),
        }
    }

    pub async fn payout_by_id(&self, address: Address) -> Result<Payout, RouterError> {
        match self.lookup(Kind::Payout, address).await? {
            Object::Payout(o) => Ok(o),
            _ => Err(RouterError::NotFound {
                kind: Kind::Payout,
                address,
            }),
        }
    }

    pub async fn receipt_by_id(&self, address: Address) -> Result<Receipt, RouterError> {
        match self.lookup(Kind::Receipt, address).await? {
            Object::Receipt(o) => Ok(o),
            _ => Err(RouterError::NotFound {
                kind: Kind::Receipt,
                address,
            }),
        }
    }

    pub async fn staker_by_id(&self, address: Address) -> Result<Staker, RouterError> {
        match self.lookup(Kind::Staker, address).await? {
            Object::Staker(o) => Ok(o),
            _ => Err(RouterError::NotFound {
                kind: Kind::Staker,
                address,
            }),
        }
    }

    pub async fn validator_by_id(&self, address: Address) -> Result<Validator, RouterError> {
        match self.lookup(Kind::Validator, address).await? {
            Object::Validator(o) => Ok(o),
            _ => Err(RouterError::NotFound {
                kind: Kind::Validator,
                address,
            }),
        }
    }

    /// Looks up a live object of `kind` at `address`.
    pub async fn lookup(&self, kind: Kind, address: Address) -> Result<Object, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Lookup {
            kind,
            address,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| RouterError::Closed)?
            .ok_or(RouterError::NotFound { kind, address })
    }

    /// Number of updates parked on a missing parent.
    pub async fn pending(&self) -> Result<usize, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Pending(reply)).await?;
        rx.await.map_err(|_| RouterError::Closed)
    }

    /// Announces every pipeline created from now on.
    pub async fn on_pipeline(&self) -> Result<Subscription<Pipeline>, HubError> {
        self.hubs.pipelines.subscribe().await
    }

    pub async fn on_payout(&self) -> Result<Subscription<Payout>, HubError> {
        self.hubs.payouts.subscribe().await
    }

    pub async fn on_receipt(&self) -> Result<Subscription<Receipt>, HubError> {
        self.hubs.receipts.subscribe().await
    }

    pub async fn on_staker(&self) -> Result<Subscription<Staker>, HubError> {
        self.hubs.stakers.subscribe().await
    }

    pub async fn on_validator(&self) -> Result<Subscription<Validator>, HubError> {
        self.hubs.validators.subscribe().await
    }

    /// Stops the router and every object it owns.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn request(&self, req: Request) -> Result<(), RouterError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(RouterError::Closed),
            res = self.tx.send(req) => res.map_err(|_| RouterError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::model::{
        Bid, PayoutData, Period, PeriodEntry, Ratio, ReceiptData, StakerData, ValidatorData,
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn() -> (Router, JoinHandle<Result<(), RouterError>>, CancellationToken) {
        let root = CancellationToken::new();
        let (router, handle) = Router::spawn(16, Bus::new(64), &root);
        (router, handle, root)
    }

    fn pipeline(balance: u64) -> PipelineData {
        PipelineData {
            balance,
            relative_stake: Ratio::new(1, 1),
            tps: 10,
        }
    }

    fn payout_update(payout: Address, pipeline: Address) -> AccountUpdate {
        AccountUpdate::open(
            payout,
            AccountPayload::Payout(PayoutData {
                pipeline,
                period: Period::new(100, 50),
                balance: 10,
                validator_count: 0,
                staker_count: 0,
            }),
        )
    }

    fn bid_list(payout: Address, is_final: bool) -> BidList {
        let bid = Bid {
            bidder: Address::repeat(0xb0),
            deposit: 1,
            bandwidth: 1,
        };
        BidList::new(payout, is_final, vec![Some(bid)])
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        timeout(WAIT, async {
            while !check().await {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn forward_references_replayed_in_order() {
        let (router, _handle, _root) = spawn();
        let pipe = Address::repeat(1);
        let payout = Address::repeat(2);
        let bids = Address::repeat(3);

        router.add_bid(bids, bid_list(payout, false)).await.unwrap();
        router.update(payout_update(payout, pipe)).await.unwrap();
        assert_eq!(router.pending().await.unwrap(), 2);
        assert!(router.payout_by_id(payout).await.is_err());

        router.add_pipeline(pipe, pipeline(5)).await.unwrap();
        router.add_bid(bids, bid_list(payout, true)).await.unwrap();
        assert_eq!(router.pending().await.unwrap(), 0);

        let p = router.payout_by_id(payout).await.unwrap();
        let mut sub = p.bids().await.unwrap();
        // Latest retention: the final list must be the one that arrived last.
        let latest = timeout(WAIT, sub.recv()).await.unwrap().unwrap().unwrap();
        assert!(latest.is_final);
    }

    #[tokio::test]
    async fn creation_hub_announces_new_objects() {
        let (router, _handle, _root) = spawn();
        let mut created = router.on_pipeline().await.unwrap();
        router
            .add_pipeline(Address::repeat(1), pipeline(5))
            .await
            .unwrap();
        // Data changes are not creations.
        router
            .add_pipeline(Address::repeat(1), pipeline(6))
            .await
            .unwrap();
        router
            .add_pipeline(Address::repeat(2), pipeline(5))
            .await
            .unwrap();

        let a = timeout(WAIT, created.recv()).await.unwrap().unwrap().unwrap();
        let b = timeout(WAIT, created.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(a.address(), Address::repeat(1));
        assert_eq!(b.address(), Address::repeat(2));
    }

    #[tokio::test]
    async fn zero_balance_deletes_and_recreates() {
        let (router, _handle, _root) = spawn();
        let addr = Address::repeat(1);
        router.add_pipeline(addr, pipeline(5)).await.unwrap();
        let first = router.pipeline_by_id(addr).await.unwrap();

        router.add_pipeline(addr, pipeline(0)).await.unwrap();
        timeout(WAIT, first.closed()).await.unwrap();
        let r = &router;
        eventually(|| async move { r.pipeline_by_id(addr).await.is_err() }).await;

        router.add_pipeline(addr, pipeline(5)).await.unwrap();
        let second = router.pipeline_by_id(addr).await.unwrap();
        assert_ne!(first.instance(), second.instance());
    }

    #[tokio::test]
    async fn closed_bid_list_becomes_blank_sentinel() {
        let (router, _handle, _root) = spawn();
        let (pipe, payout, bids) = (Address::repeat(1), Address::repeat(2), Address::repeat(3));
        router.add_pipeline(pipe, pipeline(5)).await.unwrap();
        router.update(payout_update(payout, pipe)).await.unwrap();
        router.add_bid(bids, bid_list(payout, true)).await.unwrap();
        router
            .update(AccountUpdate::closed(
                bids,
                AccountPayload::BidList(bid_list(payout, true)),
            ))
            .await
            .unwrap();

        let p = router.payout_by_id(payout).await.unwrap();
        let mut sub = p.bids().await.unwrap();
        eventually(|| {
            let got = sub.try_recv();
            async move { got.is_some_and(|l| l.is_blank()) }
        })
        .await;
    }

    #[tokio::test]
    async fn receipts_register_with_validator() {
        let (router, _handle, _root) = spawn();
        let (pipe, payout, validator, receipt, staker) = (
            Address::repeat(1),
            Address::repeat(2),
            Address::repeat(4),
            Address::repeat(5),
            Address::repeat(6),
        );
        let receipt_data = ReceiptData {
            payout,
            validator,
            balance: 3,
            tx_sent: 0,
            tx_approved: 0,
            staker_count: 0,
        };
        // Receipt and staker first: both wait on missing parents.
        router
            .update(AccountUpdate::open(
                staker,
                AccountPayload::Staker(StakerData {
                    receipt,
                    balance: 1,
                    stake: 1,
                }),
            ))
            .await
            .unwrap();
        router
            .update(AccountUpdate::open(
                receipt,
                AccountPayload::Receipt(receipt_data.clone()),
            ))
            .await
            .unwrap();
        router.add_pipeline(pipe, pipeline(5)).await.unwrap();
        router.update(payout_update(payout, pipe)).await.unwrap();
        // Payout present, validator still missing.
        assert_eq!(router.pending().await.unwrap(), 2);

        router
            .update(AccountUpdate::open(
                validator,
                AccountPayload::Validator(ValidatorData {
                    balance: 1,
                    activated_stake: 1,
                    total_stake: 2,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(router.pending().await.unwrap(), 0);
        router.staker_by_id(staker).await.unwrap();

        let v = router.validator_by_id(validator).await.unwrap();
        let mut held = v.receipts().await.unwrap();
        eventually(|| {
            let got = held.try_recv();
            async move { got.is_some_and(|s| s.contains(&receipt)) }
        })
        .await;

        router
            .update(AccountUpdate::closed(
                receipt,
                AccountPayload::Receipt(receipt_data),
            ))
            .await
            .unwrap();
        eventually(|| {
            let got = held.try_recv();
            async move { got.is_some_and(|s| s.is_empty()) }
        })
        .await;
    }

    #[tokio::test]
    async fn child_close_discards_parked_updates() {
        let (router, _handle, _root) = spawn();
        let payout = Address::repeat(2);
        let bids = Address::repeat(3);
        router.add_bid(bids, bid_list(payout, false)).await.unwrap();
        assert_eq!(router.pending().await.unwrap(), 1);
        router
            .update(AccountUpdate::closed(
                bids,
                AccountPayload::BidList(bid_list(payout, false)),
            ))
            .await
            .unwrap();
        // Only the close itself waits for the payout now.
        assert_eq!(router.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn kind_mismatch_is_fatal() {
        let (router, handle, _root) = spawn();
        let addr = Address::repeat(1);
        router.add_pipeline(addr, pipeline(5)).await.unwrap();
        router
            .update(AccountUpdate::open(
                addr,
                AccountPayload::Validator(ValidatorData {
                    balance: 1,
                    activated_stake: 0,
                    total_stake: 0,
                }),
            ))
            .await
            .unwrap();

        let err = timeout(WAIT, handle).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(err, RouterError::KindMismatch { .. }));
        assert!(err.is_fatal());
        assert!(router.pipeline_by_id(addr).await.is_err());
    }

    #[tokio::test]
    async fn malformed_ring_is_fatal() {
        let (router, handle, _root) = spawn();
        let pipe = Address::repeat(1);
        let ring = PeriodRing {
            pipeline: pipe,
            balance: 1,
            periods: vec![PeriodEntry {
                period: Period::new(10, 0),
                payout: Address::repeat(2),
            }],
        };
        router.add_period(Address::repeat(7), ring).await.unwrap();
        let err = timeout(WAIT, handle).await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.as_label(), "router_decode");
    }
}
