//! # Hub: owning actor of a [`SubHome`].
//!
//! All mutation happens inside one task that drains the hub's request queue one
//! request at a time, so `subscribe`, `broadcast`, `delete` and `close` are
//! serialized without locks.
//!
//! ```text
//! Hub (handle, Clone) ── Request ──► [queue] ──► hub task
//!                                                  ├─ SubHome (live subscriptions)
//!                                                  └─ retained values (per Retain)
//! ```
//!
//! ## Retention
//! - [`Retain::None`]: live values only
//! - [`Retain::Latest`]: a new subscriber first receives the last value
//! - [`Retain::All`]: a new subscriber first receives the full history, in order
//!
//! Replay happens inside the hub task before the subscription is registered,
//! so a late subscriber never misses or duplicates a value.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::home::{Filter, SubHome};
use super::subscription::Subscription;
use crate::error::HubError;

/// What a hub keeps for late subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retain {
    None,
    Latest,
    All,
}

pub(crate) enum Request<T> {
    Subscribe {
        filter: Filter<T>,
        reply: oneshot::Sender<Subscription<T>>,
    },
    Broadcast(T),
    Delete(u64),
    Count(oneshot::Sender<usize>),
    Close(Result<(), HubError>),
}

/// Handle to a broadcast hub.
///
/// Cheap to clone. The hub task stops when it is closed, when its parent token
/// is cancelled, or when every handle has been dropped; live subscriptions
/// receive a clean close signal in the latter two cases.
pub struct Hub<T> {
    tx: mpsc::Sender<Request<T>>,
    token: CancellationToken,
    stopped: CancellationToken,
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            token: self.token.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Hub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Hub<T> {
    /// Spawns the hub task.
    ///
    /// `buffer` is both the request queue size and the per-subscription buffer.
    pub fn spawn(retain: Retain, buffer: usize, parent: &CancellationToken) -> Self {
        let buffer = buffer.max(1);
        let (tx, rx) = mpsc::channel(buffer);
        let token = parent.child_token();
        let stopped = CancellationToken::new();
        let weak = tx.downgrade();
        tokio::spawn(run(rx, weak, retain, buffer, token.clone(), stopped.clone()));
        Self { tx, token, stopped }
    }

    /// Subscribes to every value.
    pub async fn subscribe(&self) -> Result<Subscription<T>, HubError> {
        self.subscribe_filtered(|_| true).await
    }

    /// Subscribes to the values for which `filter` returns `true`.
    ///
    /// Retained values are filtered too.
    pub async fn subscribe_filtered(
        &self,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<Subscription<T>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Subscribe {
            filter: Box::new(filter),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Queues `value` for delivery to every matching subscription.
    pub async fn broadcast(&self, value: T) -> Result<(), HubError> {
        self.request(Request::Broadcast(value)).await
    }

    /// Removes a subscription by id; its reader sees a clean close.
    pub async fn delete(&self, id: u64) -> Result<(), HubError> {
        self.request(Request::Delete(id)).await
    }

    /// Number of live subscriptions.
    pub async fn subscriber_count(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Count(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Closes the hub; every subscriber sees a clean close.
    ///
    /// Returns once the hub task has delivered every request queued before
    /// the close and signalled its subscribers.
    pub async fn close(&self) {
        self.shut(Ok(())).await;
    }

    /// Closes the hub; every subscriber sees `err`.
    ///
    /// Returns once the hub task has stopped, like [`close`](Self::close).
    pub async fn close_with(&self, err: HubError) {
        self.shut(Err(err)).await;
    }

    /// Completes once the hub task has stopped.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    async fn shut(&self, result: Result<(), HubError>) {
        let _ = self.request(Request::Close(result)).await;
        self.stopped.cancelled().await;
    }

    /// Whether the hub task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Writes to the request queue, racing the hub's own shutdown.
    async fn request(&self, req: Request<T>) -> Result<(), HubError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(HubError::Closed),
            res = self.tx.send(req) => res.map_err(|_| HubError::Closed),
        }
    }
}

async fn run<T: Clone + Send + Sync + 'static>(
    mut rx: mpsc::Receiver<Request<T>>,
    weak: mpsc::WeakSender<Request<T>>,
    retain: Retain,
    buffer: usize,
    token: CancellationToken,
    stopped: CancellationToken,
) {
    let mut home = SubHome::new(buffer);
    let mut retained: Vec<T> = Vec::new();

    let result = loop {
        let req = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            req = rx.recv() => match req {
                Some(req) => req,
                None => break Ok(()),
            },
        };
        match req {
            Request::Subscribe { filter, reply } => {
                let sub = home.subscribe(filter, &retained, weak.clone());
                let _ = reply.send(sub);
            }
            Request::Broadcast(value) => {
                if !home.broadcast(&value, &token).await {
                    break Ok(());
                }
                match retain {
                    Retain::None => {}
                    Retain::Latest => {
                        retained.clear();
                        retained.push(value);
                    }
                    Retain::All => retained.push(value),
                }
            }
            Request::Delete(id) => {
                home.delete(id);
            }
            Request::Count(reply) => {
                let _ = reply.send(home.len());
            }
            Request::Close(result) => break result,
        }
    };

    token.cancel();
    home.close(result);
    stopped.cancel();
}
