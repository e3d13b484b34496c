//! # Router actor: sole owner of the address → object maps.
//!
//! Every request is handled to completion before the next one is read. An
//! update whose parent is missing is parked in [`Unmatched`]; creating an
//! object replays whatever was parked under its address before the next
//! request is read, so a replayed update always precedes later arrivals.
//!
//! ```text
//! Request::Update ──► ready queue ──► apply ──┬─► forward to live object
//!                        ▲                    ├─► create object ─► creation hub
//!                        │                    │        └─► replay parked updates ─┐
//!                        └────────────────────┼────────────────────────────────────┘
//!                                             └─► park under missing parent
//! object close token ──► watcher ──► Deleted ──► remove from map (same instance only)
//! ```

use std::collections::{HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::unmatched::Unmatched;
use super::{Creations, Object};
use crate::error::RouterError;
use crate::events::{Bus, Notice, NoticeKind};
use crate::model::{AccountPayload, AccountUpdate, Address, BidList, Kind};
use crate::objects::{Payout, Pipeline, Receipt, Staker, Validator};

pub(crate) enum Request {
    Update(AccountUpdate),
    Lookup {
        kind: Kind,
        address: Address,
        reply: oneshot::Sender<Option<Object>>,
    },
    Pending(oneshot::Sender<usize>),
}

/// Sent by a delete watcher once an object actor has terminated.
#[derive(Debug)]
struct Deleted {
    kind: Kind,
    address: Address,
    instance: u64,
}

pub(crate) struct RouterActor {
    buffer: usize,
    token: CancellationToken,
    bus: Bus,
    hubs: Creations,

    next_instance: u64,
    kinds: HashMap<Address, Kind>,
    pipelines: HashMap<Address, Pipeline>,
    payouts: HashMap<Address, Payout>,
    receipts: HashMap<Address, Receipt>,
    stakers: HashMap<Address, Staker>,
    validators: HashMap<Address, Validator>,
    /// Period-ring account → pipeline.
    rings: HashMap<Address, Address>,
    /// Bid-list account → payout.
    bid_lists: HashMap<Address, Address>,
    /// Receipt → validator it was registered with.
    receipt_owner: HashMap<Address, Address>,

    unmatched: Unmatched,
    ready: VecDeque<(AccountUpdate, bool)>,
    deleted_tx: mpsc::UnboundedSender<Deleted>,
    deleted_rx: mpsc::UnboundedReceiver<Deleted>,
}

impl RouterActor {
    pub(crate) fn new(buffer: usize, token: CancellationToken, bus: Bus, hubs: Creations) -> Self {
        let (deleted_tx, deleted_rx) = mpsc::unbounded_channel();
        Self {
            buffer,
            token,
            bus,
            hubs,
            next_instance: 0,
            kinds: HashMap::new(),
            pipelines: HashMap::new(),
            payouts: HashMap::new(),
            receipts: HashMap::new(),
            stakers: HashMap::new(),
            validators: HashMap::new(),
            rings: HashMap::new(),
            bid_lists: HashMap::new(),
            receipt_owner: HashMap::new(),
            unmatched: Unmatched::default(),
            ready: VecDeque::new(),
            deleted_tx,
            deleted_rx,
        }
    }

    /// Runs until cancelled, until every handle is dropped, or until a fatal error.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Request>) -> Result<(), RouterError> {
        let result = loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break Ok(()),
                Some(d) = self.deleted_rx.recv() => self.on_deleted(d).await,
                req = rx.recv() => match req {
                    None => break Ok(()),
                    Some(Request::Update(update)) => {
                        if let Err(e) = self.ingest(update).await {
                            break Err(e);
                        }
                    }
                    Some(Request::Lookup { kind, address, reply }) => {
                        let _ = reply.send(self.lookup(kind, address));
                    }
                    Some(Request::Pending(reply)) => {
                        let _ = reply.send(self.unmatched.len());
                    }
                },
            }
        };

        if let Err(e) = &result {
            warn!(error = %e, "router stopped on protocol error");
            self.bus
                .publish(Notice::new(NoticeKind::RouterFailed).with_reason(e.to_string()));
        }
        self.token.cancel();
        self.hubs.close().await;
        result
    }

    async fn ingest(&mut self, update: AccountUpdate) -> Result<(), RouterError> {
        self.ready.push_back((update, false));
        while let Some((update, replayed)) = self.ready.pop_front() {
            self.apply(update, replayed).await?;
        }
        Ok(())
    }

    async fn apply(&mut self, update: AccountUpdate, replayed: bool) -> Result<(), RouterError> {
        let address = update.address;
        let kind = update.payload.kind();
        if let Some(&expected) = self.kinds.get(&address) {
            if expected != kind {
                return Err(RouterError::KindMismatch {
                    address,
                    expected,
                    found: kind,
                });
            }
        }
        update
            .payload
            .validate()
            .map_err(|reason| RouterError::Decode { address, reason })?;

        if replayed {
            debug!(%address, %kind, "replaying parked update");
            self.bus.publish(
                Notice::new(NoticeKind::ForwardReplayed)
                    .with_subject(address)
                    .with_object(kind),
            );
        }

        if !update.is_open || update.payload.balance() == 0 {
            self.close_account(update).await;
            return Ok(());
        }

        for (parent_kind, parent) in update.payload.parents() {
            if !self.is_live(parent_kind, &parent) {
                self.park(parent_kind, parent, update);
                return Ok(());
            }
        }

        self.kinds.insert(address, kind);
        match update.payload {
            AccountPayload::Pipeline(data) => match self.pipelines.get(&address) {
                Some(p) if !p.is_closed() => {
                    p.update(data).await;
                }
                _ => {
                    let instance = self.instance();
                    let p = Pipeline::spawn(address, instance, data, self.buffer, &self.token);
                    self.watch(Kind::Pipeline, address, instance, p.close_token());
                    self.pipelines.insert(address, p.clone());
                    let _ = self.hubs.pipelines.broadcast(p).await;
                    self.created(Kind::Pipeline, address);
                }
            },
            AccountPayload::PeriodRing(ring) => {
                self.rings.insert(address, ring.pipeline);
                if let Some(p) = self.pipelines.get(&ring.pipeline) {
                    p.update_periods(ring).await;
                }
            }
            AccountPayload::Payout(data) => match self.payouts.get(&address) {
                Some(p) if !p.is_closed() => {
                    p.update(data).await;
                }
                _ => {
                    let instance = self.instance();
                    let p = Payout::spawn(address, instance, data, self.buffer, &self.token);
                    self.watch(Kind::Payout, address, instance, p.close_token());
                    self.payouts.insert(address, p.clone());
                    let _ = self.hubs.payouts.broadcast(p).await;
                    self.created(Kind::Payout, address);
                }
            },
            AccountPayload::BidList(list) => {
                self.bid_lists.insert(address, list.payout);
                if let Some(p) = self.payouts.get(&list.payout) {
                    p.update_bids(list).await;
                }
            }
            AccountPayload::Receipt(data) => match self.receipts.get(&address) {
                Some(r) if !r.is_closed() => {
                    r.update(data).await;
                }
                _ => {
                    let validator = data.validator;
                    let instance = self.instance();
                    let r = Receipt::spawn(address, instance, data, self.buffer, &self.token);
                    self.watch(Kind::Receipt, address, instance, r.close_token());
                    self.receipts.insert(address, r.clone());
                    if let Some(v) = self.validators.get(&validator) {
                        v.add_receipt(address).await;
                        self.receipt_owner.insert(address, validator);
                    }
                    let _ = self.hubs.receipts.broadcast(r).await;
                    self.created(Kind::Receipt, address);
                }
            },
            AccountPayload::Staker(data) => match self.stakers.get(&address) {
                Some(s) if !s.is_closed() => {
                    s.update(data).await;
                }
                _ => {
                    let instance = self.instance();
                    let s = Staker::spawn(address, instance, data, self.buffer, &self.token);
                    self.watch(Kind::Staker, address, instance, s.close_token());
                    self.stakers.insert(address, s.clone());
                    let _ = self.hubs.stakers.broadcast(s).await;
                    self.created(Kind::Staker, address);
                }
            },
            AccountPayload::Validator(data) => match self.validators.get(&address) {
                Some(v) if !v.is_closed() => {
                    v.update(data).await;
                }
                _ => {
                    let instance = self.instance();
                    let v = Validator::spawn(address, instance, data, self.buffer, &self.token);
                    self.watch(Kind::Validator, address, instance, v.close_token());
                    self.validators.insert(address, v.clone());
                    let _ = self.hubs.validators.broadcast(v).await;
                    self.created(Kind::Validator, address);
                }
            },
        }
        Ok(())
    }

    /// Handles `is_open == false` or a zero balance.
    async fn close_account(&mut self, update: AccountUpdate) {
        let address = update.address;
        let dropped = self.unmatched.discard_child(&address);
        if dropped > 0 {
            debug!(%address, dropped, "discarded parked updates of closed account");
        }
        match &update.payload {
            AccountPayload::Pipeline(_) => {
                if let Some(p) = self.pipelines.get(&address) {
                    p.close().await;
                }
            }
            AccountPayload::PeriodRing(_) => {
                self.rings.remove(&address);
                self.kinds.remove(&address);
            }
            AccountPayload::Payout(_) => {
                if let Some(p) = self.payouts.get(&address) {
                    p.close().await;
                }
            }
            AccountPayload::BidList(list) => {
                let payout = self.bid_lists.get(&address).copied().unwrap_or(list.payout);
                if !self.is_live(Kind::Payout, &payout) {
                    self.park(Kind::Payout, payout, update.clone());
                    return;
                }
                self.bid_lists.remove(&address);
                self.kinds.remove(&address);
                if let Some(p) = self.payouts.get(&payout) {
                    p.update_bids(BidList::blank(payout)).await;
                }
            }
            AccountPayload::Receipt(_) => {
                if let Some(r) = self.receipts.get(&address) {
                    r.close().await;
                }
            }
            AccountPayload::Staker(_) => {
                if let Some(s) = self.stakers.get(&address) {
                    s.close().await;
                }
            }
            AccountPayload::Validator(_) => {
                if let Some(v) = self.validators.get(&address) {
                    v.close().await;
                }
            }
        }
    }

    fn park(&mut self, parent_kind: Kind, parent: Address, update: AccountUpdate) {
        let (address, kind) = (update.address, update.payload.kind());
        debug!(%address, %kind, %parent, parent_kind = %parent_kind, "parent missing; parking update");
        self.bus.publish(
            Notice::new(NoticeKind::ForwardQueued)
                .with_subject(address)
                .with_object(kind)
                .with_reason(format!("waiting for {parent_kind} {parent}")),
        );
        self.unmatched.insert(parent, update);
    }

    fn created(&mut self, kind: Kind, address: Address) {
        info!(%address, %kind, "object created");
        self.bus.publish(
            Notice::new(NoticeKind::ObjectCreated)
                .with_subject(address)
                .with_object(kind),
        );
        for update in self.unmatched.take(&address) {
            self.ready.push_back((update, true));
        }
    }

    async fn on_deleted(&mut self, d: Deleted) {
        let removed = match d.kind {
            Kind::Pipeline => remove_instance(&mut self.pipelines, &d, Pipeline::instance),
            Kind::Payout => remove_instance(&mut self.payouts, &d, Payout::instance),
            Kind::Receipt => remove_instance(&mut self.receipts, &d, Receipt::instance),
            Kind::Staker => remove_instance(&mut self.stakers, &d, Staker::instance),
            Kind::Validator => remove_instance(&mut self.validators, &d, Validator::instance),
            Kind::PeriodRing | Kind::BidList => false,
        };
        if !removed {
            debug!(address = %d.address, instance = d.instance, "ignoring stale delete");
            return;
        }
        self.kinds.remove(&d.address);
        if d.kind == Kind::Receipt {
            if let Some(validator) = self.receipt_owner.remove(&d.address) {
                if let Some(v) = self.validators.get(&validator) {
                    v.remove_receipt(d.address).await;
                }
            }
        }
        info!(address = %d.address, kind = %d.kind, "object deleted");
        self.bus.publish(
            Notice::new(NoticeKind::ObjectDeleted)
                .with_subject(d.address)
                .with_object(d.kind),
        );
    }

    fn lookup(&self, kind: Kind, address: Address) -> Option<Object> {
        let obj = match kind {
            Kind::Pipeline => self.pipelines.get(&address).cloned().map(Object::Pipeline),
            Kind::Payout => self.payouts.get(&address).cloned().map(Object::Payout),
            Kind::Receipt => self.receipts.get(&address).cloned().map(Object::Receipt),
            Kind::Staker => self.stakers.get(&address).cloned().map(Object::Staker),
            Kind::Validator => self.validators.get(&address).cloned().map(Object::Validator),
            Kind::PeriodRing | Kind::BidList => None,
        };
        obj.filter(|o| !o.is_closed())
    }

    fn is_live(&self, kind: Kind, address: &Address) -> bool {
        self.lookup(kind, *address).is_some()
    }

    fn instance(&mut self) -> u64 {
        self.next_instance += 1;
        self.next_instance
    }

    /// Turns an object's close token into a [`Deleted`] message.
    fn watch(&self, kind: Kind, address: Address, instance: u64, closed: CancellationToken) {
        let tx = self.deleted_tx.clone();
        tokio::spawn(async move {
            closed.cancelled().await;
            let _ = tx.send(Deleted {
                kind,
                address,
                instance,
            });
        });
    }
}

fn remove_instance<O>(map: &mut HashMap<Address, O>, d: &Deleted, instance: fn(&O) -> u64) -> bool {
    match map.get(&d.address) {
        Some(obj) if instance(obj) == d.instance => {
            map.remove(&d.address);
            true
        }
        _ => false,
    }
}
