//! # Event log: ordered history of one scheduler.
//!
//! Backed by a `Retain::All` hub, so a subscriber attaching after N events
//! first receives exactly those N events in order, then live ones. The history
//! lives as long as the scheduler.

use tracing::{debug, info};

use super::event::Event;
use crate::error::{HubError, SchedulerError};
use crate::events::{Bus, Notice, NoticeKind};
use crate::hub::Hub;
use crate::model::{Address, Kind};

#[derive(Clone, Debug)]
pub(crate) struct EventLog {
    hub: Hub<Event>,
    bus: Bus,
    object: Kind,
    address: Address,
}

impl EventLog {
    pub(crate) fn new(hub: Hub<Event>, bus: Bus, object: Kind, address: Address) -> Self {
        Self {
            hub,
            bus,
            object,
            address,
        }
    }

    /// Appends `event` to the history.
    pub(crate) async fn emit(&self, event: Event) -> Result<(), SchedulerError> {
        debug!(
            object = %self.object,
            address = %self.address,
            slot = event.slot,
            kind = %event.kind,
            state_change = event.is_state_change,
            "scheduler event"
        );
        if let Some(trigger) = &event.trigger {
            info!(address = %self.address, kind = %event.kind, id = trigger.id(), "trigger emitted");
            self.bus.publish(
                Notice::new(NoticeKind::TriggerEmitted)
                    .with_subject(trigger.subject())
                    .with_object(self.object)
                    .with_trigger(event.kind),
            );
        }
        self.hub.broadcast(event).await.map_err(SchedulerError::from)
    }

    pub(crate) async fn close(&self) {
        self.hub.close().await;
    }

    pub(crate) async fn fail(&self, err: &SchedulerError) {
        self.hub.close_with(HubError::terminated(err.to_string())).await;
    }
}
