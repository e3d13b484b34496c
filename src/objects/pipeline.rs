use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Meta, object_identity, send};
use crate::error::HubError;
use crate::hub::{Hub, Retain, Subscription};
use crate::model::{Address, PeriodRing, PipelineData};

enum Command {
    Data(PipelineData),
    Periods(PeriodRing),
    Close,
}

/// Pipeline object: account data plus its period ring.
#[derive(Clone, Debug)]
pub struct Pipeline {
    meta: Meta,
    tx: mpsc::Sender<Command>,
    data: Hub<Arc<PipelineData>>,
    periods: Hub<Arc<PeriodRing>>,
}

object_identity!(Pipeline);

impl Pipeline {
    pub(crate) fn spawn(
        address: Address,
        instance: u64,
        data: PipelineData,
        buffer: usize,
        parent: &CancellationToken,
    ) -> Self {
        let meta = Meta::new(address, instance, parent);
        let data_hub = Hub::spawn(Retain::Latest, buffer, &meta.closed);
        let periods = Hub::spawn(Retain::Latest, buffer, &meta.closed);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(run(rx, data, data_hub.clone(), periods.clone(), meta.clone()));
        Self {
            meta,
            tx,
            data: data_hub,
            periods,
        }
    }

    /// Subscribes to the pipeline account data.
    pub async fn data(&self) -> Result<Subscription<Arc<PipelineData>>, HubError> {
        self.data.subscribe().await
    }

    /// Subscribes to the period ring; nothing is delivered until a ring is known.
    pub async fn periods(&self) -> Result<Subscription<Arc<PeriodRing>>, HubError> {
        self.periods.subscribe().await
    }

    pub async fn update(&self, data: PipelineData) -> bool {
        send(&self.tx, &self.meta.closed, Command::Data(data)).await
    }

    pub async fn update_periods(&self, ring: PeriodRing) -> bool {
        send(&self.tx, &self.meta.closed, Command::Periods(ring)).await
    }

    pub async fn close(&self) {
        send(&self.tx, &self.meta.closed, Command::Close).await;
    }
}

async fn run(
    mut rx: mpsc::Receiver<Command>,
    data: PipelineData,
    data_hub: Hub<Arc<PipelineData>>,
    periods: Hub<Arc<PeriodRing>>,
    meta: Meta,
) {
    let mut next = Some(data);
    loop {
        if let Some(data) = next.take() {
            if data.balance == 0 {
                debug!(address = %meta.address, "pipeline balance reached zero");
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
        match cmd {
            Some(Command::Data(data)) => next = Some(data),
            Some(Command::Periods(ring)) => {
                if periods.broadcast(Arc::new(ring)).await.is_err() {
                    break;
                }
            }
            Some(Command::Close) | None => break,
        }
    }
    data_hub.close().await;
    periods.close().await;
    meta.closed.cancel();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::model::{PeriodEntry, Period, Ratio};

    fn data(balance: u64) -> PipelineData {
        PipelineData {
            balance,
            relative_stake: Ratio::new(1, 2),
            tps: 100,
        }
    }

    #[tokio::test]
    async fn period_ring_published_latest_first() {
        let root = CancellationToken::new();
        let addr = Address::repeat(1);
        let pipe = Pipeline::spawn(addr, 3, data(10), 4, &root);
        assert_eq!(pipe.address(), addr);
        assert_eq!(pipe.instance(), 3);

        let ring = PeriodRing {
            pipeline: addr,
            balance: 1,
            periods: vec![PeriodEntry {
                period: Period::new(100, 50),
                payout: Address::repeat(2),
            }],
        };
        assert!(pipe.update_periods(ring.clone()).await);

        let mut sub = pipe.periods().await.unwrap();
        let got = timeout(Duration::from_secs(5), sub.recv()).await.unwrap();
        assert_eq!(got.unwrap().unwrap().as_ref(), &ring);
    }

    #[tokio::test]
    async fn close_ends_every_hub() {
        let root = CancellationToken::new();
        let pipe = Pipeline::spawn(Address::repeat(1), 0, data(10), 4, &root);
        let mut d = pipe.data().await.unwrap();
        let mut p = pipe.periods().await.unwrap();
        assert_eq!(d.recv().await.unwrap().unwrap().tps, 100);

        pipe.close().await;
        timeout(Duration::from_secs(5), pipe.closed()).await.unwrap();
        assert_eq!(d.recv().await, Ok(None));
        assert_eq!(p.recv().await, Ok(None));
    }
}
