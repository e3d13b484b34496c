//! # Observe: user hook for runtime notices.
//!
//! Each observer is driven by its own worker task fed by a bounded queue owned
//! by the [`ObserverSet`](super::ObserverSet). A slow observer only delays
//! itself.
//!
//! ## Overflow
//! When the queue is full the notice is dropped for that observer only, and
//! an `ObserverOverflow` notice is published on the bus.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use pipesync::events::{Notice, NoticeKind};
//! use pipesync::observers::Observe;
//!
//! struct Exhaustions;
//!
//! #[async_trait]
//! impl Observe for Exhaustions {
//!     async fn on_notice(&self, n: &Notice) {
//!         if n.kind == NoticeKind::TriggerExhausted {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "exhaustions" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Notice;

/// Consumer of runtime notices.
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    /// Handles one notice. Notices arrive in bus order per observer.
    ///
    /// A panic is caught and reported as `ObserverPanicked`.
    async fn on_notice(&self, notice: &Notice);

    /// Name used in overflow and panic reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this observer's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
