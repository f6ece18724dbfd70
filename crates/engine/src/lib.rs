pub mod config;
pub mod error;
pub mod events;
mod outings;
pub mod poll;
pub mod print;
mod rebuild;
mod reconcile;
pub mod recovery;
pub mod session;
mod tracks;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::{event_channel, EventConsumer, EventProducer, SourceEvent};
pub use poll::{spawn_poll_loop, SourcePoller};
pub use print::{Corner, Orientation, PageLayout, PrintOptions, PrintPlan};
pub use rebuild::{RebuildReport, RebuildScope};
pub use recovery::RecoveryReport;
pub use session::{CropOutcome, LineStyle, MapSession, MarkerStyle, PolygonStyle, SessionError, SinceBatch};

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use debrief_core::{Feature, FeatureClass, FeatureId, SyncGate};
use debrief_storage::{CorrespondenceStore, StateFile};

/// Why a feature is being reconciled. Only affects audit-log wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cause {
    New,
    Replay,
    PropertyChange,
    GeometryChange,
    MissingMirror,
}

impl Cause {
    pub(crate) fn track_log(&self, title: &str) -> String {
        match self {
            Cause::New | Cause::Replay => format!("Added track {title}"),
            Cause::PropertyChange => format!("Reimported track {title} due to property changes"),
            Cause::GeometryChange => format!("Reimported track {title} due to geometry change"),
            Cause::MissingMirror => format!("Reimported track {title} after its mirror went missing"),
        }
    }
}

#[derive(Debug)]
pub struct StartupReport {
    pub recovery: RecoveryReport,
    pub replayed: usize,
    /// Correspondences whose source feature was deleted while offline.
    pub reaped: usize,
    /// The startup snapshot of the source map; seed the poller with it.
    pub baseline: SinceBatch,
}

/// Mirrors one source map into one target map.
pub struct Engine<S, T> {
    source: S,
    target: T,
    store: CorrespondenceStore,
    state: StateFile,
    config: EngineConfig,
    gate: SyncGate,
    /// Folders whose title matched an excluded keyword, filled in as folder
    /// features are seen.
    excluded_folders: BTreeSet<FeatureId>,
    last_sync: Option<u64>,
}

impl<S: MapSession, T: MapSession> Engine<S, T> {
    /// Engine persisting to `dmg_<source>_<target>.json` under the
    /// configured state directory.
    pub fn new(source: S, target: T, config: EngineConfig) -> Self {
        let state = StateFile::for_maps(
            &config.state_dir,
            source.map_id(),
            target.map_id(),
            SyncGate::new(),
        );
        Self::with_state(source, target, config, state)
    }

    pub fn with_state(source: S, target: T, config: EngineConfig, state: StateFile) -> Self {
        let gate = state.gate().clone();
        Self {
            source,
            target,
            store: CorrespondenceStore::new(),
            state,
            config,
            gate,
            excluded_folders: BTreeSet::new(),
            last_sync: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn store(&self) -> &CorrespondenceStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    /// The pause gate shared with persistence; hand clones to the poller.
    pub fn gate(&self) -> SyncGate {
        self.gate.clone()
    }

    pub fn excluded_folders(&self) -> &BTreeSet<FeatureId> {
        &self.excluded_folders
    }

    pub fn last_sync(&self) -> Option<u64> {
        self.last_sync
    }

    pub fn into_parts(self) -> (S, T, StateFile) {
        (self.source, self.target, self.state)
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Load the persisted store, drop whatever no longer exists on either
    /// map, then replay the whole source map. Failing to read either map is
    /// fatal.
    pub fn start(&mut self) -> Result<StartupReport, EngineError> {
        let baseline = self.source.since(0)?;
        let source_live = baseline.live_ids();
        let target_live = self.target.live_ids()?;
        info!(
            source = self.source.map_id(),
            target = self.target.map_id(),
            source_features = source_live.len(),
            target_features = target_live.len(),
            "starting debrief sync"
        );

        let recovery = match self.state.load()? {
            Some(persisted) => {
                let (store, report) = recovery::recover(persisted, &source_live, &target_live);
                self.store = store;
                report
            }
            None => RecoveryReport::default(),
        };
        self.persist()?;
        self.clear_orphans(&recovery.orphaned_targets);

        let replayed = self.replay(&baseline.features);
        let reaped = self.reap_vanished_sources(&source_live)?;
        self.persist()?;

        info!(replayed, reaped, outings = self.store.outings.len(), "startup complete");
        Ok(StartupReport {
            recovery,
            replayed,
            reaped,
            baseline,
        })
    }

    /// Feed every feature through the reconciler once: folders first so
    /// exclusions are known, then assignments so outings exist before their
    /// tracks and clues.
    pub(crate) fn replay(&mut self, features: &[Feature]) -> usize {
        let mut ordered: Vec<&Feature> = features.iter().collect();
        ordered.sort_by_key(|f| match f.class() {
            FeatureClass::Folder => 0,
            FeatureClass::Assignment => 1,
            _ => 2,
        });
        for f in &ordered {
            if let Err(e) = self.handle_feature(f, Cause::Replay) {
                error!(error = %e, id = %f.id, title = f.title(), "replay failed for feature");
            }
        }
        ordered.len()
    }

    /// Delete what dropped outings left on the target map. Failures only
    /// leave a stray feature behind, so they are logged and skipped.
    fn clear_orphans(&mut self, orphans: &[FeatureId]) {
        for id in orphans {
            match self.delete_target(*id) {
                Ok(_) => debug!(%id, "deleted feature of dropped outing"),
                Err(e) => warn!(error = %e, %id, "could not delete feature of dropped outing"),
            }
        }
    }

    /// Correspondences and empty outings left behind by source features
    /// deleted while the engine was not running.
    fn reap_vanished_sources(&mut self, source_live: &BTreeSet<FeatureId>) -> Result<usize, EngineError> {
        let vanished: BTreeSet<FeatureId> = self
            .store
            .corr
            .keys()
            .chain(self.store.outings.values().filter_map(|o| o.sid.as_ref()))
            .filter(|sid| !source_live.contains(sid))
            .copied()
            .collect();
        for sid in &vanished {
            debug!(%sid, "source feature vanished while offline");
            self.remove_mirror(*sid, true)?;
            self.prune_outings(*sid)?;
        }
        Ok(vanished.len())
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    pub fn apply(&mut self, event: SourceEvent) -> Result<(), EngineError> {
        match event {
            SourceEvent::NewFeature(f) => self.handle_feature(&f, Cause::New),
            SourceEvent::PropertyChanged(f) => self.on_property_changed(&f),
            SourceEvent::GeometryChanged(f) => self.on_geometry_changed(&f),
            SourceEvent::Deleted { id, class } => self.on_deleted(id, &class),
            SourceEvent::Synced { timestamp } => {
                self.last_sync = Some(timestamp);
                debug!(timestamp, "source sync heartbeat");
                Ok(())
            }
        }
    }

    /// Consume events until every producer is dropped. Failures are logged
    /// and never stop the loop.
    pub fn run(&mut self, events: &EventConsumer) -> usize {
        let mut handled = 0;
        while let Some(event) = events.recv() {
            self.apply_logged(event);
            handled += 1;
        }
        info!(handled, "event channel closed; engine stopping");
        handled
    }

    /// Handle whatever is queued right now.
    pub fn drain(&mut self, events: &EventConsumer) -> usize {
        let mut handled = 0;
        for event in events.try_iter() {
            self.apply_logged(event);
            handled += 1;
        }
        handled
    }

    fn apply_logged(&mut self, event: SourceEvent) {
        let kind = event.kind();
        let id = event.feature_id();
        if let Err(e) = self.apply(event) {
            error!(error = %e, kind, ?id, "event handling failed");
        }
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    pub(crate) fn persist(&mut self) -> Result<(), EngineError> {
        self.state.persist(&self.store)?;
        Ok(())
    }

    /// Delete a target feature if it still exists. Returns whether it did.
    pub(crate) fn delete_target(&mut self, id: FeatureId) -> Result<bool, EngineError> {
        match self.target.get_feature(id)? {
            Some(f) => Ok(self.target.del_feature(id, &f.class())?),
            None => Ok(false),
        }
    }
}
