//! Manual rebuild: delete what the store knows about on the target map and
//! replay from the source. Polling and persistence are paused throughout.

use std::collections::BTreeSet;

use tracing::{info, warn};

use debrief_core::FeatureId;

use crate::session::MapSession;
use crate::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildScope {
    /// One outing: its folder, boundary, tracks and clues.
    Outing(String),
    /// Everything the store references.
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub deleted: usize,
    pub replayed: usize,
}

impl<S: MapSession, T: MapSession> Engine<S, T> {
    pub fn rebuild(&mut self, scope: RebuildScope) -> Result<RebuildReport, EngineError> {
        if let RebuildScope::Outing(name) = &scope {
            self.store.outing(name)?;
        }

        let guard = self.gate.hold();
        info!(?scope, "rebuild started; sync paused");

        let names: Vec<String> = match &scope {
            RebuildScope::Outing(name) => vec![name.clone()],
            RebuildScope::All => self.store.outings.keys().cloned().collect(),
        };

        let mut doomed: BTreeSet<FeatureId> = BTreeSet::new();
        for name in &names {
            if let Some(outing) = self.store.remove_outing(name) {
                doomed.extend(outing.target_ids());
            }
        }
        if scope == RebuildScope::All {
            doomed.extend(self.store.target_ids());
        }

        let mut deleted = 0;
        for id in &doomed {
            match self.delete_target(*id) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, %id, "rebuild could not delete target feature"),
            }
        }

        if scope == RebuildScope::All {
            self.store.corr.clear();
            self.store.unclaimed_tracks.clear();
            self.store.unclaimed_clues.clear();
            for entry in self.store.app_tracks.values_mut() {
                entry.1 = None;
            }
        } else {
            self.store.forget_targets(&doomed);
        }

        let features = self.source.get_features(None, None)?;
        let replayed = self.replay(&features);

        drop(guard);
        self.persist()?;
        info!(deleted, replayed, "rebuild finished; sync resumed");
        Ok(RebuildReport { deleted, replayed })
    }
}
