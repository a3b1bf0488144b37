//! In-process typed publish/subscribe: components publish without knowing
//! who (if anyone) is listening.
//!
//! Every publish goes through a [`tokio::sync::broadcast`] channel, so a
//! lagging subscriber only loses its own backlog (`RecvError::Lagged`) and
//! never blocks the publisher.

use tokio::sync::broadcast;

use crate::cabin::DoorState;
use crate::floor::{Direction, ElevatorId, Floor};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    CabinFloorChanged {
        id: ElevatorId,
        floor: Floor,
        door_state: DoorState,
        moving_direction: Direction,
    },
    CabinStateChanged {
        id: ElevatorId,
        floor: Floor,
        door_state: DoorState,
        moving_direction: Direction,
    },
}

/// A cheaply-cloneable handle around a broadcast sender. Every `Cabin` and
/// the `Controller` hold a clone; nobody needs to subscribe for `publish`
/// to succeed.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus { tx }
    }

    pub fn publish(&self, event: BusEvent) {
        // No subscribers is a normal, silent no-op.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
