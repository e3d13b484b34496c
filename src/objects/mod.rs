//! On-chain objects: one actor per live account.
//!
//! The router creates an object the first time it sees its account and forwards
//! every later update onto the object's command queue. Each object owns its
//! latest data and republishes it on `Retain::Latest` hubs for schedulers.
//!
//! ## Contents
//! - [`Pipeline`] data + period ring
//! - [`Payout`] data + bid lists + changed bidders
//! - [`Validator`] data + set of held receipts
//! - [`Receipt`], [`Staker`] data only ([`Record`])
//!
//! ## Lifecycle
//! ```text
//! router ── create ──► object task ──► data hubs ──► schedulers
//!        ── update ──►     │
//!        ── close  ──►     ▼
//!              balance == 0 / close / parent token
//!                          │
//!                          └─► hubs closed, close token cancelled
//!                                   └─► router delete watcher ─► Deleted{kind, address, instance}
//! ```

/// Identity accessors shared by every object handle.
macro_rules! object_identity {
    ($ty:ident $(<$g:ident>)?) => {
        impl$(<$g: $crate::objects::Account>)? $ty$(<$g>)? {
            /// On-chain address of the object.
            pub fn address(&self) -> $crate::model::Address {
                self.meta.address
            }

            /// Router-assigned instance number; a re-created account gets a new one.
            pub fn instance(&self) -> u64 {
                self.meta.instance
            }

            /// Whether the object actor has terminated.
            pub fn is_closed(&self) -> bool {
                self.meta.closed.is_cancelled()
            }

            /// Completes once the object actor has terminated.
            pub async fn closed(&self) {
                self.meta.closed.cancelled().await
            }

            /// Token cancelled when the object terminates.
            pub fn close_token(&self) -> tokio_util::sync::CancellationToken {
                self.meta.closed.clone()
            }
        }
    };
}

use object_identity;

mod payout;
mod pipeline;
mod record;
mod validator;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::{Address, Kind, ReceiptData, StakerData};

pub use payout::Payout;
pub use pipeline::Pipeline;
pub use record::Record;
pub use validator::Validator;

/// Receipt object.
pub type Receipt = Record<ReceiptData>;
/// Staker object.
pub type Staker = Record<StakerData>;

/// Account data carrying a lamport balance; zero means the account is gone.
pub trait Account: Clone + Send + Sync + 'static {
    const KIND: Kind;
    fn balance(&self) -> u64;
}

impl Account for ReceiptData {
    const KIND: Kind = Kind::Receipt;
    fn balance(&self) -> u64 {
        self.balance
    }
}

impl Account for StakerData {
    const KIND: Kind = Kind::Staker;
    fn balance(&self) -> u64 {
        self.balance
    }
}

/// Identity shared by every object handle.
#[derive(Clone, Debug)]
pub(crate) struct Meta {
    pub(crate) address: Address,
    pub(crate) instance: u64,
    pub(crate) closed: CancellationToken,
}

impl Meta {
    pub(crate) fn new(address: Address, instance: u64, parent: &CancellationToken) -> Self {
        Self {
            address,
            instance,
            closed: parent.child_token(),
        }
    }
}

/// Puts `cmd` on an object queue unless the object has already terminated.
pub(crate) async fn send<C>(tx: &mpsc::Sender<C>, closed: &CancellationToken, cmd: C) -> bool {
    tokio::select! {
        biased;
        _ = closed.cancelled() => false,
        res = tx.send(cmd) => res.is_ok(),
    }
}
