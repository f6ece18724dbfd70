//! The reconciler: for every observed source feature decide between import,
//! reimport, in-place modify and nothing, and do it once.

use std::collections::BTreeSet;
use std::thread;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use debrief_core::clock::physical_now;
use debrief_core::track::{base_outing_name, TrackName};
use debrief_core::{Feature, FeatureClass, FeatureId, Geometry, Properties};
use debrief_storage::{AppTrackEntry, ClueOwner, Holding};

use crate::session::{LineStyle, MapSession, MarkerStyle, PolygonStyle};
use crate::{Cause, Engine, EngineError};

const FINISHED_SUFFIX: &str = " [FINISHED]";

impl<S: MapSession, T: MapSession> Engine<S, T> {
    // ========================================================================
    // Dispatch
    // ========================================================================

    pub(crate) fn handle_feature(&mut self, f: &Feature, cause: Cause) -> Result<(), EngineError> {
        match f.class() {
            FeatureClass::Folder => {
                self.observe_folder(f);
                return Ok(());
            }
            FeatureClass::AppTrack => return self.observe_app_track(f),
            FeatureClass::Assignment => return self.add_outing(f).map(|_| ()),
            _ => {}
        }

        if self.store.app_tracks.contains_key(&f.id) {
            self.finish_app_track(f.id)?;
        }

        if self.in_excluded_folder(f) {
            if self.store.corr.contains_key(&f.id) {
                info!(title = f.title(), "feature moved into an excluded folder; removing its mirror");
                self.remove_mirror(f.id, true)?;
                self.persist()?;
            }
            return Ok(());
        }

        let Some(tids) = self.store.correspondents(f.id).map(<[FeatureId]>::to_vec) else {
            return self.import_new(f, cause);
        };

        let mut first = None;
        let mut all_exist = true;
        for (i, tid) in tids.iter().enumerate() {
            match self.target.get_feature(*tid)? {
                Some(t) if i == 0 => first = Some(t),
                Some(_) => {}
                None => {
                    all_exist = false;
                    break;
                }
            }
        }

        if all_exist {
            return self.reconcile_existing(f, &tids, first.as_ref(), cause);
        }
        warn!(title = f.title(), "mirrored feature missing from target map; reimporting");
        self.remove_mirror(f.id, false)?;
        self.import_new(f, Cause::MissingMirror)
    }

    pub(crate) fn on_property_changed(&mut self, f: &Feature) -> Result<(), EngineError> {
        self.handle_feature(f, Cause::PropertyChange)
    }

    /// Tracks are reimported so they get cropped again. Everything else takes
    /// the normal path and has its geometry edited in place.
    pub(crate) fn on_geometry_changed(&mut self, f: &Feature) -> Result<(), EngineError> {
        if f.track_name().is_some() && self.store.corr.contains_key(&f.id) && !self.in_excluded_folder(f) {
            info!(title = f.title(), "track geometry changed; reimporting");
            self.remove_mirror(f.id, false)?;
            return self.import_new(f, Cause::GeometryChange);
        }
        self.handle_feature(f, Cause::GeometryChange)
    }

    pub(crate) fn on_deleted(&mut self, id: FeatureId, class: &FeatureClass) -> Result<(), EngineError> {
        match class {
            FeatureClass::AppTrack => {
                if !self.store.app_tracks.contains_key(&id) {
                    return Ok(());
                }
                match self.source.get_feature(id)? {
                    Some(f) if f.class() == FeatureClass::Shape => self.finish_app_track(id)?,
                    _ => {
                        if let Some(entry) = self.store.app_tracks.remove(&id) {
                            debug!(title = entry.title(), "live track dropped");
                        }
                    }
                }
                self.persist()
            }
            FeatureClass::Folder => {
                if self.excluded_folders.remove(&id) {
                    debug!(%id, "excluded folder deleted");
                }
                Ok(())
            }
            _ => {
                self.remove_mirror(id, true)?;
                self.prune_outings(id)?;
                self.persist()
            }
        }
    }

    // ========================================================================
    // Existing mirrors
    // ========================================================================

    fn reconcile_existing(
        &mut self,
        f: &Feature,
        tids: &[FeatureId],
        first: Option<&Feature>,
        cause: Cause,
    ) -> Result<(), EngineError> {
        let reimport_cause = match cause {
            Cause::GeometryChange => Cause::GeometryChange,
            _ => Cause::PropertyChange,
        };

        if let Some(track) = f.track_name() {
            let Some(first) = first else {
                return Ok(());
            };
            if first.title() == track.display_title() {
                debug!(track = first.title(), "track unchanged");
                return Ok(());
            }
            info!(from = first.title(), to = %track.display_title(), "track renamed; reimporting");
            self.remove_mirror(f.id, false)?;
            return self.import_new(f, reimport_cause);
        }

        let Some(first) = first else {
            return Ok(());
        };
        if self.store.is_track_target(first.id) {
            info!(title = f.title(), "line no longer named as a track; reimporting");
            self.remove_mirror(f.id, false)?;
            return self.import_new(f, reimport_cause);
        }

        if tids.len() > 1 {
            error!(title = f.title(), targets = tids.len(), "several mirrors for one feature; not editing any of them");
            return Ok(());
        }

        if f.class() == FeatureClass::Clue {
            return self.reconcile_clue(f, first);
        }

        if let Some(desired) = mirror_properties(f) {
            if !desired.is_subset_of(&first.properties) {
                debug!(title = f.title(), "properties changed; editing mirror");
                self.target.edit_feature(first.id, Some(&desired), None)?;
            }
        }
        if let Some(desired) = f.geometry.as_ref().and_then(mirror_geometry) {
            if first.geometry.as_ref() != Some(&desired) {
                debug!(title = f.title(), "geometry changed; editing mirror");
                self.target.edit_feature(first.id, None, Some(&desired))?;
            }
        }
        Ok(())
    }

    fn reconcile_clue(&mut self, f: &Feature, target: &Feature) -> Result<(), EngineError> {
        let assignment = f.properties.assignment_id();
        let home = match assignment {
            Some(sid) => self.clue_home(sid)?,
            None => None,
        };
        // after `clue_home`: a newly created outing may already have swept it up
        let holder = match self.store.holder_of(target.id) {
            Some((name, Holding::Clue)) => Some(name),
            _ => None,
        };

        let owner_changed = match (&holder, &home) {
            (None, None) => self.store.unclaimed_clues.get(&target.id) != Some(&ClueOwner::from_assignment(assignment)),
            _ => holder != home,
        };
        if owner_changed {
            self.move_clue(target.id, f.title(), holder.as_deref(), home.as_deref(), assignment)?;
        }
        let holder = home;

        let desired = MarkerStyle::clue(&f.properties).to_properties();
        if !desired.is_subset_of(&target.properties) {
            self.target.edit_feature(target.id, Some(&desired), None)?;
            if let Some(outing) = &holder {
                if target.title() != f.title() {
                    self.store
                        .add_log(outing, format!("Clue title changed: {} --> {}", target.title(), f.title()))?;
                } else {
                    self.store.add_log(outing, format!("Description edited for clue {}", f.title()))?;
                }
            }
        }

        if let Some(desired) = f.geometry.as_ref().and_then(mirror_geometry) {
            if target.geometry.as_ref() != Some(&desired) {
                self.target.edit_feature(target.id, None, Some(&desired))?;
                if let Some(outing) = &holder {
                    self.store.add_log(outing, format!("Geometry edited for clue {}", f.title()))?;
                }
            }
        }
        self.persist()
    }

    fn move_clue(
        &mut self,
        cid: FeatureId,
        title: &str,
        from: Option<&str>,
        to: Option<&str>,
        assignment: Option<FeatureId>,
    ) -> Result<(), EngineError> {
        let folder = match to {
            Some(name) => self.store.outing(name)?.fid.map_or(Value::Null, |fid| Value::String(fid.to_string())),
            None => Value::Null,
        };
        let props = Properties::new().with("folderId", folder);
        self.edit_with_retry(cid, &props)?;

        self.store.strip_target(cid);
        match to {
            Some(name) => self.store.outing_mut(name)?.cids.push(cid),
            None => {
                self.store
                    .unclaimed_clues
                    .insert(cid, ClueOwner::from_assignment(assignment));
            }
        }

        let to_label = to.unwrap_or("unassigned");
        let from_label = from.unwrap_or("unassigned");
        if let Some(from) = from {
            self.store
                .add_log(from, format!("Moved clue {title} from this outing to {to_label}"))?;
        }
        if let Some(to) = to {
            self.store
                .add_log(to, format!("Clue {title} moved here from {from_label}"))?;
        }
        info!(clue = title, from = from_label, to = to_label, "clue moved");
        Ok(())
    }

    /// Clue folder moves are the one write that gets a second chance.
    fn edit_with_retry(&mut self, id: FeatureId, props: &Properties) -> Result<bool, EngineError> {
        match self.target.edit_feature(id, Some(props), None) {
            Ok(true) => return Ok(true),
            Ok(false) => warn!(%id, "edit not applied; retrying once"),
            Err(e) => warn!(error = %e, %id, "edit failed; retrying once"),
        }
        thread::sleep(self.config.clue_retry_delay());
        let done = self.target.edit_feature(id, Some(props), None)?;
        if !done {
            error!(%id, "edit failed after retry");
        }
        Ok(done)
    }

    // ========================================================================
    // New mirrors
    // ========================================================================

    fn import_new(&mut self, f: &Feature, cause: Cause) -> Result<(), EngineError> {
        match (f.class(), &f.geometry) {
            (FeatureClass::Shape, Some(Geometry::LineString(_))) => self.import_line(f, cause),
            (FeatureClass::Shape, Some(Geometry::Polygon(rings))) => {
                let Some(ring) = rings.first() else {
                    return Ok(());
                };
                let tid = self.target.add_polygon(ring, &PolygonStyle::mirror(&f.properties))?;
                self.store.add_correspondence(f.id, [tid]);
                debug!(title = f.title(), "mirrored polygon");
                self.persist()
            }
            (FeatureClass::Marker, Some(Geometry::Point(p))) => {
                let tid = self.target.add_marker(p, &MarkerStyle::mirror(&f.properties))?;
                self.store.add_correspondence(f.id, [tid]);
                debug!(title = f.title(), "mirrored marker");
                self.persist()
            }
            (FeatureClass::Clue, Some(Geometry::Point(p))) => self.import_clue(f, p),
            (FeatureClass::Unknown(class), _) => {
                warn!(%class, title = f.title(), "unhandled feature class; not mirrored");
                Ok(())
            }
            (class, geometry) => {
                debug!(%class, kind = ?geometry.as_ref().map(Geometry::kind), "nothing to mirror");
                Ok(())
            }
        }
    }

    fn import_clue(&mut self, f: &Feature, position: &[f64]) -> Result<(), EngineError> {
        let assignment = f.properties.assignment_id();
        let home = match assignment {
            Some(sid) => self.clue_home(sid)?,
            None => None,
        };
        let fid = match &home {
            Some(name) => self.store.outing(name)?.fid,
            None => None,
        };

        let style = MarkerStyle::clue(&f.properties).folder(fid);
        let cid = self.target.add_marker(&position.to_vec(), &style)?;
        self.store.add_correspondence(f.id, [cid]);
        match &home {
            Some(name) => {
                self.store.outing_mut(name)?.cids.push(cid);
                self.store.add_log(name, format!("Added clue {}", f.title()))?;
            }
            None => {
                debug!(clue = f.title(), "no outing for clue yet; holding it unclaimed");
                self.store
                    .unclaimed_clues
                    .insert(cid, ClueOwner::from_assignment(assignment));
            }
        }
        self.persist()
    }

    /// First outing of the clue's assignment, creating it from the source
    /// assignment when none exists yet.
    fn clue_home(&mut self, sid: FeatureId) -> Result<Option<String>, EngineError> {
        let mut candidates = self.store.outings_for_assignment(sid);
        if candidates.is_empty() {
            self.add_outing_by_id(sid)?;
            candidates = self.store.outings_for_assignment(sid);
        }
        if candidates.len() > 1 {
            warn!(%sid, ?candidates, "several outings share this assignment; using the first");
        }
        Ok(candidates.into_iter().next())
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Delete every target feature mirrored from `sid` and drop it from every
    /// outing and unclaimed bucket. With `log_removals`, each outing that held
    /// one gets a single audit line.
    pub(crate) fn remove_mirror(&mut self, sid: FeatureId, log_removals: bool) -> Result<usize, EngineError> {
        let Some(tids) = self.store.remove_correspondence(sid) else {
            return Ok(0);
        };

        let mut logged = BTreeSet::new();
        for tid in &tids {
            let title = match self.target.get_feature(*tid) {
                Ok(Some(t)) => {
                    if let Err(e) = self.target.del_feature(*tid, &t.class()) {
                        warn!(error = %e, %tid, "failed to delete mirrored feature");
                    }
                    t.title().to_string()
                }
                Ok(None) => String::new(),
                Err(e) => {
                    warn!(error = %e, %tid, "failed to look up mirrored feature");
                    String::new()
                }
            };

            for (outing, holding) in self.store.strip_target(*tid) {
                if !log_removals || !logged.insert(outing.clone()) {
                    continue;
                }
                let what = match holding {
                    Holding::Clue => "Clue",
                    Holding::Track | Holding::UncroppedTrack => "Track",
                };
                self.store.add_log(&outing, format!("{what} deleted: {}", base_segment_title(&title)))?;
            }
        }
        debug!(%sid, removed = tids.len(), "mirror removed");
        Ok(tids.len())
    }

    /// Drop the outings of a deleted assignment that hold nothing, along with
    /// their folder and boundary. Outings with tracks or clues stay.
    pub(crate) fn prune_outings(&mut self, sid: FeatureId) -> Result<(), EngineError> {
        for name in self.store.outings_for_assignment(sid) {
            let outing = self.store.outing(&name)?;
            if !outing.is_empty() {
                info!(outing = %name, "assignment deleted; outing holds data and is kept as history");
                continue;
            }
            let ids: Vec<FeatureId> = outing.bid.into_iter().chain(outing.fid).collect();
            for id in ids {
                self.delete_target(id)?;
            }
            self.store.remove_outing(&name);
            info!(outing = %name, "assignment deleted; empty outing pruned");
        }
        Ok(())
    }

    // ========================================================================
    // Folders and live tracks
    // ========================================================================

    fn observe_folder(&mut self, folder: &Feature) {
        if self.config.is_excluded_folder_title(folder.title()) {
            if self.excluded_folders.insert(folder.id) {
                info!(folder = folder.title(), "excluding folder contents from the mirror");
            }
        } else if self.excluded_folders.remove(&folder.id) {
            info!(folder = folder.title(), "folder no longer excluded");
        }
    }

    pub(crate) fn in_excluded_folder(&self, f: &Feature) -> bool {
        f.properties
            .folder_id()
            .is_some_and(|fid| self.excluded_folders.contains(&fid))
    }

    fn observe_app_track(&mut self, f: &Feature) -> Result<(), EngineError> {
        let previous = self.store.app_tracks.get(&f.id).cloned();
        let last_seen = match f.properties.get("updated").and_then(Value::as_u64) {
            Some(ts) => ts,
            None => match &previous {
                Some(entry) => entry.last_seen(),
                None => physical_now()?,
            },
        };
        let outing = previous
            .as_ref()
            .and_then(|e| e.outing().map(str::to_string))
            .or_else(|| self.app_track_outing(f.title()));

        let newly_linked = outing.is_some() && previous.as_ref().and_then(AppTrackEntry::outing).is_none();
        if newly_linked {
            if let Some(name) = &outing {
                self.store.add_log(name, format!("Live track {} in progress", f.title()))?;
            }
        }

        self.store
            .app_tracks
            .insert(f.id, AppTrackEntry(f.title().to_string(), outing, last_seen));
        self.persist()
    }

    /// Device finished the capture: the live track is now a normal line.
    fn finish_app_track(&mut self, id: FeatureId) -> Result<(), EngineError> {
        let Some(entry) = self.store.app_tracks.get_mut(&id) else {
            return Ok(());
        };
        if entry.0.ends_with(FINISHED_SUFFIX) {
            return Ok(());
        }
        entry.0.push_str(FINISHED_SUFFIX);
        let (title, outing) = (entry.0.clone(), entry.1.clone());
        if let Some(outing) = outing {
            self.store.add_log(&outing, format!("Live track finished: {title}"))?;
        }
        info!(track = %title, "live track finished");
        Ok(())
    }

    /// Outing for a live track title. Conventional track names map the
    /// usual way; otherwise the longest outing name the title starts with,
    /// spaces ignored.
    pub(crate) fn app_track_outing(&self, title: &str) -> Option<String> {
        if let Some(track) = TrackName::parse(title) {
            return self.store.latest_outing_named(&track.outing_name());
        }
        let squashed = squash(title);
        let base = self
            .store
            .outings
            .keys()
            .map(|name| base_outing_name(name))
            .filter(|base| {
                let b = squash(base);
                !b.is_empty() && squashed.starts_with(&b)
            })
            .max_by_key(|base| base.len())?
            .to_string();
        self.store.latest_outing_named(&base)
    }
}

/// Properties the mirror of a non-track feature should carry.
fn mirror_properties(f: &Feature) -> Option<Properties> {
    match (f.class(), &f.geometry) {
        (FeatureClass::Shape, Some(Geometry::LineString(_))) => Some(LineStyle::mirror(&f.properties).to_properties()),
        (FeatureClass::Shape, Some(Geometry::Polygon(_))) => Some(PolygonStyle::mirror(&f.properties).to_properties()),
        (FeatureClass::Marker, _) => Some(MarkerStyle::mirror(&f.properties).to_properties()),
        _ => None,
    }
}

/// Geometry as the mirror stores it: polygons keep their outer ring only.
fn mirror_geometry(geometry: &Geometry) -> Option<Geometry> {
    match geometry {
        Geometry::Polygon(rings) => rings.first().map(|ring| Geometry::Polygon(vec![ring.clone()])),
        other => Some(other.clone()),
    }
}

fn squash(s: &str) -> String {
    s.to_uppercase().chars().filter(|c| !c.is_whitespace()).collect()
}

/// `AA101a:2` is the second crop segment of `AA101a`.
fn base_segment_title(title: &str) -> &str {
    base_outing_name(title)
}
