//! Chain notifications published after each committed update.
//!
//! Subscribers get `ChainEvent`s over a broadcast channel (lagging receivers
//! lose the oldest events), and the latest best position is always
//! available from a watch channel.

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::core::params::ChainId;
use crate::core::types::*;

/// Events buffered per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChainEvent {
    /// The best chain was extended
    NewHeader { chain: ChainId, tip: Position },
    /// The best chain was rewound to `ancestor` and now ends at `tip`
    Reorg { chain: ChainId, ancestor: Position, tip: Position },
}

impl ChainEvent {
    pub fn chain(&self) -> ChainId {
        match self {
            ChainEvent::NewHeader { chain, .. } | ChainEvent::Reorg { chain, .. } => *chain,
        }
    }

    pub fn tip(&self) -> Position {
        match self {
            ChainEvent::NewHeader { tip, .. } | ChainEvent::Reorg { tip, .. } => *tip,
        }
    }
}

pub struct EventBus {
    events: broadcast::Sender<ChainEvent>,
    height: watch::Sender<Position>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.events.receiver_count())
            .field("height", &*self.height.borrow())
            .finish()
    }
}

impl EventBus {
    pub fn new(best: Position) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (height, _) = watch::channel(best);
        Self { events, height }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn local_height(&self) -> watch::Receiver<Position> {
        self.height.subscribe()
    }

    pub fn publish(&self, event: ChainEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("no chain event subscribers");
        }
    }

    pub fn set_best(&self, best: Position) {
        self.height.send_replace(best);
    }
}
