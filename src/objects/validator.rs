use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Meta, object_identity, send};
use crate::error::HubError;
use crate::hub::{Hub, Retain, Subscription};
use crate::model::{Address, ValidatorData};

enum Command {
    Data(ValidatorData),
    AddReceipt(Address),
    RemoveReceipt(Address),
    Close,
}

/// Validator object: account data and the receipts it currently holds.
#[derive(Clone, Debug)]
pub struct Validator {
    meta: Meta,
    tx: mpsc::Sender<Command>,
    data: Hub<Arc<ValidatorData>>,
    receipts: Hub<Arc<BTreeSet<Address>>>,
}

object_identity!(Validator);

impl Validator {
    pub(crate) fn spawn(
        address: Address,
        instance: u64,
        data: ValidatorData,
        buffer: usize,
        parent: &CancellationToken,
    ) -> Self {
        let meta = Meta::new(address, instance, parent);
        let data_hub = Hub::spawn(Retain::Latest, buffer, &meta.closed);
        let receipts = Hub::spawn(Retain::Latest, buffer, &meta.closed);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(run(rx, data, data_hub.clone(), receipts.clone(), meta.clone()));
        Self {
            meta,
            tx,
            data: data_hub,
            receipts,
        }
    }

    pub async fn data(&self) -> Result<Subscription<Arc<ValidatorData>>, HubError> {
        self.data.subscribe().await
    }

    /// Subscribes to the set of held receipts; every change republishes the whole set.
    pub async fn receipts(&self) -> Result<Subscription<Arc<BTreeSet<Address>>>, HubError> {
        self.receipts.subscribe().await
    }

    pub async fn update(&self, data: ValidatorData) -> bool {
        send(&self.tx, &self.meta.closed, Command::Data(data)).await
    }

    pub(crate) async fn add_receipt(&self, receipt: Address) -> bool {
        send(&self.tx, &self.meta.closed, Command::AddReceipt(receipt)).await
    }

    pub(crate) async fn remove_receipt(&self, receipt: Address) -> bool {
        send(&self.tx, &self.meta.closed, Command::RemoveReceipt(receipt)).await
    }

    pub async fn close(&self) {
        send(&self.tx, &self.meta.closed, Command::Close).await;
    }
}

async fn run(
    mut rx: mpsc::Receiver<Command>,
    data: ValidatorData,
    data_hub: Hub<Arc<ValidatorData>>,
    receipts: Hub<Arc<BTreeSet<Address>>>,
    meta: Meta,
) {
    let mut held = BTreeSet::new();
    let mut next = Some(data);
    let _ = receipts.broadcast(Arc::new(held.clone())).await;
    loop {
        if let Some(data) = next.take() {
            if data.balance == 0 {
                debug!(address = %meta.address, "validator balance reached zero");
                break;
            }
            if data_hub.broadcast(Arc::new(data)).await.is_err() {
                break;
            }
        }
        let cmd = tokio::select! {
            _ = meta.closed.cancelled() => break,
            cmd = rx.recv() => cmd,
        };
        let changed = match cmd {
            Some(Command::Data(data)) => {
                next = Some(data);
                false
            }
            Some(Command::AddReceipt(r)) => held.insert(r),
            Some(Command::RemoveReceipt(r)) => held.remove(&r),
            Some(Command::Close) | None => break,
        };
        if changed && receipts.broadcast(Arc::new(held.clone())).await.is_err() {
            break;
        }
    }
    data_hub.close().await;
    receipts.close().await;
    meta.closed.cancel();
}
