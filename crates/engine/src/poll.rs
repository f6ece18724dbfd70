//! Source polling: turns "since" responses into typed events by diffing them
//! against a local feature cache.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use debrief_core::{Feature, FeatureId, SyncGate};

use crate::error::EngineError;
use crate::events::{EventProducer, SourceEvent};
use crate::session::{MapSession, SinceBatch};

/// Each poll reaches this far back before the last server timestamp.
pub const SINCE_OVERLAP_MS: u64 = 500;

pub struct SourcePoller {
    cache: BTreeMap<FeatureId, Feature>,
    cursor: u64,
    gate: SyncGate,
}

impl SourcePoller {
    pub fn new(gate: SyncGate) -> Self {
        Self {
            cache: BTreeMap::new(),
            cursor: 0,
            gate,
        }
    }

    /// Start from a batch the engine has already replayed, so its features
    /// are not announced again.
    pub fn from_baseline(baseline: &SinceBatch, gate: SyncGate) -> Self {
        Self {
            cache: baseline.features.iter().map(|f| (f.id, f.clone())).collect(),
            cursor: baseline.timestamp,
            gate,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Poll once and enqueue the resulting events. Nothing is requested while
    /// the gate is paused, and the cursor stays put. Returns the number of
    /// feature events sent.
    pub fn poll_once<S: MapSession>(
        &mut self,
        session: &S,
        producer: &EventProducer,
    ) -> Result<usize, EngineError> {
        if self.gate.is_paused() {
            debug!("sync paused; skipping poll");
            return Ok(0);
        }

        let batch = session.since(self.cursor.saturating_sub(SINCE_OVERLAP_MS))?;
        let events = self.diff(batch);
        let count = events.len().saturating_sub(1);
        for event in events {
            producer.send(event)?;
        }
        Ok(count)
    }

    fn diff(&mut self, batch: SinceBatch) -> Vec<SourceEvent> {
        let mut events = Vec::new();
        let live = batch.ids.clone();

        for f in batch.features {
            match self.cache.get(&f.id) {
                None => {
                    debug!(class = %f.class(), title = f.title(), "new source feature");
                    events.push(SourceEvent::NewFeature(f.clone()));
                }
                Some(old) => {
                    if old.properties != f.properties {
                        events.push(SourceEvent::PropertyChanged(f.clone()));
                    }
                    if f.geometry.is_some() && old.geometry != f.geometry {
                        events.push(SourceEvent::GeometryChanged(f.clone()));
                    }
                }
            }
            self.cache.insert(f.id, f);
        }

        if let Some(live) = live {
            let gone: Vec<FeatureId> = self
                .cache
                .keys()
                .filter(|id| !live.contains(id))
                .copied()
                .collect();
            for id in gone {
                if let Some(f) = self.cache.remove(&id) {
                    debug!(class = %f.class(), title = f.title(), "source feature deleted");
                    events.push(SourceEvent::Deleted { id, class: f.class() });
                }
            }
        }

        self.cursor = batch.timestamp;
        events.push(SourceEvent::Synced { timestamp: batch.timestamp });
        events
    }
}

/// Run the poller on its own thread until the consumer goes away.
pub fn spawn_poll_loop<S>(
    session: S,
    mut poller: SourcePoller,
    producer: EventProducer,
    interval: Duration,
) -> JoinHandle<()>
where
    S: MapSession + Send + 'static,
{
    thread::spawn(move || {
        info!(map = session.map_id(), "source sync started");
        loop {
            match poller.poll_once(&session, &producer) {
                Ok(_) => {}
                Err(EngineError::ChannelClosed) => break,
                Err(e) => warn!(error = %e, "source poll failed"),
            }
            thread::sleep(interval);
        }
        info!(map = session.map_id(), "source sync stopped");
    })
}
