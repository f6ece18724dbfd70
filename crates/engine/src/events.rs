//! Typed source events and the channel that carries them from the poller to
//! the engine. Dropping every producer closes the channel and ends
//! [`crate::Engine::run`].

use crossbeam::channel::{self, Receiver, Sender};

use debrief_core::{Feature, FeatureClass, FeatureId};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    NewFeature(Feature),
    PropertyChanged(Feature),
    GeometryChanged(Feature),
    Deleted { id: FeatureId, class: FeatureClass },
    /// Heartbeat after each successful poll.
    Synced { timestamp: u64 },
}

impl SourceEvent {
    pub fn feature_id(&self) -> Option<FeatureId> {
        match self {
            SourceEvent::NewFeature(f)
            | SourceEvent::PropertyChanged(f)
            | SourceEvent::GeometryChanged(f) => Some(f.id),
            SourceEvent::Deleted { id, .. } => Some(*id),
            SourceEvent::Synced { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceEvent::NewFeature(_) => "new",
            SourceEvent::PropertyChanged(_) => "property",
            SourceEvent::GeometryChanged(_) => "geometry",
            SourceEvent::Deleted { .. } => "deleted",
            SourceEvent::Synced { .. } => "synced",
        }
    }
}

#[derive(Clone)]
pub struct EventProducer {
    tx: Sender<SourceEvent>,
}

impl EventProducer {
    pub fn send(&self, event: SourceEvent) -> Result<(), EngineError> {
        self.tx.send(event).map_err(|_| EngineError::ChannelClosed)
    }
}

pub struct EventConsumer {
    rx: Receiver<SourceEvent>,
}

impl EventConsumer {
    /// Block for the next event. `None` once every producer is gone.
    pub fn recv(&self) -> Option<SourceEvent> {
        self.rx.recv().ok()
    }

    /// Events already queued, without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = SourceEvent> + '_ {
        self.rx.try_iter()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn event_channel() -> (EventProducer, EventConsumer) {
    let (tx, rx) = channel::unbounded();
    (EventProducer { tx }, EventConsumer { rx })
}
