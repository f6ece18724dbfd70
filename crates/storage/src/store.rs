//! The correspondence store: every link between the source map and the
//! mirrored target map, plus the per-outing records.
//!
//! All mutation goes through one owner, so nothing here locks. Collections
//! are rebuilt and swapped rather than edited while iterating.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use debrief_core::clock::physical_now;
use debrief_core::track::{base_outing_name, outing_index};
use debrief_core::FeatureId;

use crate::error::StorageError;
use crate::records::{AppTrackEntry, ClueOwner, Holding, Outing};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrespondenceStore {
    #[serde(default)]
    pub outings: BTreeMap<String, Outing>,
    #[serde(default)]
    pub corr: BTreeMap<FeatureId, Vec<FeatureId>>,
    #[serde(default)]
    pub unclaimed_tracks: BTreeMap<FeatureId, String>,
    #[serde(default)]
    pub unclaimed_clues: BTreeMap<FeatureId, ClueOwner>,
    #[serde(default)]
    pub app_tracks: BTreeMap<FeatureId, AppTrackEntry>,
}

impl CorrespondenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Correspondence
    // ========================================================================

    /// Append target ids to the source feature's correspondence list.
    pub fn add_correspondence(&mut self, sid: FeatureId, tids: impl IntoIterator<Item = FeatureId>) {
        let list = self.corr.entry(sid).or_default();
        for tid in tids {
            if !list.contains(&tid) {
                list.push(tid);
            }
        }
    }

    pub fn correspondents(&self, sid: FeatureId) -> Option<&[FeatureId]> {
        self.corr.get(&sid).map(Vec::as_slice)
    }

    pub fn remove_correspondence(&mut self, sid: FeatureId) -> Option<Vec<FeatureId>> {
        self.corr.remove(&sid)
    }

    pub fn source_for_target(&self, tid: FeatureId) -> Option<FeatureId> {
        self.corr
            .iter()
            .find(|(_, tids)| tids.contains(&tid))
            .map(|(sid, _)| *sid)
    }

    /// Swap `tid` for `replacement` in whichever correspondence list holds it.
    pub fn replace_target(&mut self, tid: FeatureId, replacement: &[FeatureId]) -> bool {
        let Some(sid) = self.source_for_target(tid) else {
            warn!(%tid, "no source feature corresponds to target");
            return false;
        };
        let list = self.corr.entry(sid).or_default();
        let mut next: Vec<FeatureId> = Vec::with_capacity(list.len() + replacement.len());
        for id in list.iter().copied() {
            let incoming: &[FeatureId] = if id == tid { replacement } else { std::slice::from_ref(&id) };
            for r in incoming {
                if !next.contains(r) {
                    next.push(*r);
                }
            }
        }
        *list = next;
        true
    }

    /// Drop the given target ids from every correspondence list, removing
    /// keys whose list becomes empty.
    pub fn forget_targets(&mut self, tids: &BTreeSet<FeatureId>) {
        let corr = std::mem::take(&mut self.corr);
        self.corr = corr
            .into_iter()
            .filter_map(|(sid, list)| {
                let kept: Vec<FeatureId> = list.into_iter().filter(|t| !tids.contains(t)).collect();
                (!kept.is_empty()).then_some((sid, kept))
            })
            .collect();
    }

    // ========================================================================
    // Outings
    // ========================================================================

    pub fn outing(&self, name: &str) -> Result<&Outing, StorageError> {
        self.outings
            .get(name)
            .ok_or_else(|| StorageError::OutingNotFound(name.to_string()))
    }

    pub fn outing_mut(&mut self, name: &str) -> Result<&mut Outing, StorageError> {
        self.outings
            .get_mut(name)
            .ok_or_else(|| StorageError::OutingNotFound(name.to_string()))
    }

    pub fn insert_outing(&mut self, name: &str, outing: Outing) -> Result<(), StorageError> {
        if self.outings.contains_key(name) {
            return Err(StorageError::OutingExists(name.to_string()));
        }
        self.outings.insert(name.to_string(), outing);
        Ok(())
    }

    pub fn remove_outing(&mut self, name: &str) -> Option<Outing> {
        self.outings.remove(name)
    }

    pub fn rename_outing(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        if self.outings.contains_key(to) {
            return Err(StorageError::OutingExists(to.to_string()));
        }
        let outing = self
            .outings
            .remove(from)
            .ok_or_else(|| StorageError::OutingNotFound(from.to_string()))?;
        self.outings.insert(to.to_string(), outing);
        for entry in self.app_tracks.values_mut() {
            if entry.1.as_deref() == Some(from) {
                entry.1 = Some(to.to_string());
            }
        }
        Ok(())
    }

    /// Outing names whose `sid` is the given assignment, in name order.
    pub fn outings_for_assignment(&self, sid: FeatureId) -> Vec<String> {
        self.outings
            .iter()
            .filter(|(_, o)| o.sid == Some(sid))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The most recent outing for a base name such as `AA 101`: the one with
    /// the highest disambiguation index.
    pub fn latest_outing_named(&self, base: &str) -> Option<String> {
        self.outings
            .keys()
            .filter(|name| base_outing_name(name) == base)
            .max_by_key(|name| outing_index(name))
            .cloned()
    }

    /// `title` if free, otherwise `title:N` for the lowest free `N >= 2`.
    pub fn unique_outing_name(&self, title: &str) -> String {
        if !self.outings.contains_key(title) {
            return title.to_string();
        }
        (2u32..)
            .map(|n| format!("{title}:{n}"))
            .find(|candidate| !self.outings.contains_key(candidate))
            .unwrap_or_else(|| title.to_string())
    }

    pub fn add_log(&mut self, name: &str, text: impl Into<String>) -> Result<(), StorageError> {
        let now = physical_now()?;
        let text = text.into();
        debug!(outing = name, %text, "outing log");
        self.outing_mut(name)?.push_log(now, text);
        Ok(())
    }

    /// Which outing holds `tid`, and in which collection.
    pub fn holder_of(&self, tid: FeatureId) -> Option<(String, Holding)> {
        self.outings
            .iter()
            .find_map(|(name, o)| o.holding(tid).map(|h| (name.clone(), h)))
    }

    /// Remove `tid` from every outing and unclaimed bucket. Returns the
    /// outings that held it.
    pub fn strip_target(&mut self, tid: FeatureId) -> Vec<(String, Holding)> {
        let mut held = Vec::new();
        for (name, outing) in self.outings.iter_mut() {
            if let Some(h) = outing.strip(tid) {
                held.push((name.clone(), h));
            }
        }
        self.unclaimed_tracks.remove(&tid);
        self.unclaimed_clues.remove(&tid);
        held
    }

    /// Mirrors of source tracks: anything owned as a track or waiting as an
    /// unclaimed track.
    pub fn is_track_target(&self, tid: FeatureId) -> bool {
        self.unclaimed_tracks.contains_key(&tid)
            || matches!(
                self.holder_of(tid),
                Some((_, Holding::Track | Holding::UncroppedTrack))
            )
    }

    /// Every target id the store knows about.
    pub fn target_ids(&self) -> BTreeSet<FeatureId> {
        let mut ids: BTreeSet<FeatureId> = self.corr.values().flatten().copied().collect();
        for outing in self.outings.values() {
            ids.extend(outing.target_ids());
        }
        ids.extend(self.unclaimed_tracks.keys().copied());
        ids.extend(self.unclaimed_clues.keys().copied());
        ids
    }
}
