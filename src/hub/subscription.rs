use tokio::sync::{mpsc, oneshot};

use super::actor::Request;
use crate::error::HubError;

/// Receiving end of one hub subscription.
///
/// Values arrive in broadcast order. Once the stream ends, [`recv`](Self::recv)
/// reports the close signal once: `Ok(None)` for a clean close, `Err` otherwise.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    done: Option<oneshot::Receiver<Result<(), HubError>>>,
    home: mpsc::WeakSender<Request<T>>,
    // Retained values still unread at the front of `rx`.
    replay: usize,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: u64,
        rx: mpsc::Receiver<T>,
        done: oneshot::Receiver<Result<(), HubError>>,
        home: mpsc::WeakSender<Request<T>>,
        replay: usize,
    ) -> Self {
        Self {
            id,
            rx,
            done: Some(done),
            home,
            replay,
        }
    }

    /// Id of this subscription within its hub.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next value.
    ///
    /// - `Ok(Some(v))`: next value
    /// - `Ok(None)`: hub closed cleanly or subscription deleted
    /// - `Err(e)`: hub terminated with an error (reported once)
    pub async fn recv(&mut self) -> Result<Option<T>, HubError> {
        match self.rx.recv().await {
            Some(v) => {
                self.replay = self.replay.saturating_sub(1);
                Ok(Some(v))
            }
            None => self.finish(),
        }
    }

    /// Returns a value if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        let v = self.rx.try_recv().ok()?;
        self.replay = self.replay.saturating_sub(1);
        Some(v)
    }

    /// Returns the next value replayed from the hub's retained history.
    ///
    /// `None` once the replay is consumed; values broadcast after the
    /// subscription was registered are never returned here.
    pub fn try_replayed(&mut self) -> Option<T> {
        if self.replay == 0 {
            return None;
        }
        self.try_recv()
    }

    fn finish(&mut self) -> Result<Option<T>, HubError> {
        let Some(mut done) = self.done.take() else {
            return Ok(None);
        };
        match done.try_recv() {
            Ok(result) => result.map(|()| None),
            // Owner vanished without signalling.
            Err(_) => Err(HubError::Closed),
        }
    }

    /// Removes the subscription from its hub and returns the close signal.
    ///
    /// Buffered and in-flight values are drained and discarded so the hub
    /// never blocks on this subscription while the delete is pending.
    pub async fn unsubscribe(mut self) -> Result<(), HubError> {
        if let Some(home) = self.home.upgrade() {
            let send = home.send(Request::Delete(self.id));
            tokio::pin!(send);
            loop {
                tokio::select! {
                    _ = &mut send => break,
                    v = self.rx.recv() => if v.is_none() { break },
                }
            }
        }
        while self.rx.recv().await.is_some() {}
        self.finish().map(|_| ())
    }
}
