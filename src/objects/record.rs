use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Account, Meta, object_identity, send};
use crate::error::HubError;
use crate::hub::{Hub, Retain, Subscription};
use crate::model::Address;

enum Command<D> {
    Data(D),
    Close,
}

/// Object whose only state is its account data (receipts and stakers).
pub struct Record<D: Account> {
    meta: Meta,
    tx: mpsc::Sender<Command<D>>,
    data: Hub<Arc<D>>,
}

impl<D: Account> Clone for Record<D> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            tx: self.tx.clone(),
            data: self.data.clone(),
        }
    }
}

impl<D: Account> std::fmt::Debug for Record<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("kind", &D::KIND)
            .field("address", &self.meta.address)
            .field("instance", &self.meta.instance)
            .finish()
    }
}

object_identity!(Record<D>);

impl<D: Account> Record<D> {
    pub(crate) fn spawn(
        address: Address,
        instance: u64,
        data: D,
        buffer: usize,
        parent: &CancellationToken,
    ) -> Self {
        let meta = Meta::new(address, instance, parent);
        let hub = Hub::spawn(Retain::Latest, buffer, &meta.closed);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(run(rx, data, hub.clone(), meta.clone()));
        Self { meta, tx, data: hub }
    }

    /// Subscribes to the account data, starting with the current value.
    pub async fn data(&self) -> Result<Subscription<Arc<D>>, HubError> {
        self.data.subscribe().await
    }

    /// Applies a new account snapshot. A zero balance closes the object.
    pub async fn update(&self, data: D) -> bool {
        send(&self.tx, &self.meta.closed, Command::Data(data)).await
    }

    /// Closes the object.
    pub async fn close(&self) {
        send(&self.tx, &self.meta.closed, Command::Close).await;
    }
}

async fn run<D: Account>(mut rx: mpsc::Receiver<Command<D>>, data: D, hub: Hub<Arc<D>>, meta: Meta) {
    let mut current = data;
    loop {
        if current.balance() == 0 {
            debug!(kind = %D::KIND, address = %meta.address, "balance reached zero");
            break;
        }
        if hub.broadcast(Arc::new(current)).await.is_err() {
            break;
        }
        current = tokio::select! {
            _ = meta.closed.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(Command::Data(d)) => d,
                Some(Command::Close) | None => break,
            },
        };
    }
    hub.close().await;
    meta.closed.cancel();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::model::StakerData;

    fn staker(balance: u64) -> StakerData {
        StakerData {
            receipt: Address::repeat(9),
            balance,
            stake: 10,
        }
    }

    #[tokio::test]
    async fn zero_balance_closes_record() {
        let root = CancellationToken::new();
        let obj = Record::spawn(Address::repeat(1), 0, staker(5), 4, &root);
        let mut sub = obj.data().await.unwrap();
        assert_eq!(sub.recv().await.unwrap().unwrap().balance, 5);

        assert!(obj.update(staker(7)).await);
        assert_eq!(sub.recv().await.unwrap().unwrap().balance, 7);

        obj.update(staker(0)).await;
        timeout(Duration::from_secs(5), obj.closed()).await.unwrap();
        assert!(obj.is_closed());
        assert_eq!(sub.recv().await, Ok(None));
        assert!(!obj.update(staker(3)).await);
    }
}
