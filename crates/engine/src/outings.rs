//! Outing lifecycle: one folder and one boundary per (assignment, team)
//! pairing, created on first sighting and kept as history afterwards.

use tracing::{debug, info, warn};

use debrief_core::track::{base_outing_name, is_placeholder, outing_title, TrackName};
use debrief_core::{Feature, FeatureClass, FeatureId, Geometry, Properties};
use debrief_storage::{ClueOwner, Outing};

use crate::session::{LineStyle, MapSession, PolygonStyle};
use crate::{Engine, EngineError};

const BOUNDARY_WIDTH: f64 = 8.0;
const BOUNDARY_OPACITY: f64 = 0.4;

impl<S: MapSession, T: MapSession> Engine<S, T> {
    /// Create or refresh the outing(s) for an assignment and return their
    /// names. Assignments naming several teams get one outing per team;
    /// assignments without both a letter and a number get none.
    pub fn add_outing(&mut self, assignment: &Feature) -> Result<Vec<String>, EngineError> {
        let props = &assignment.properties;
        let (letter, number) = (props.letter(), props.number());
        if letter.is_empty() || number.is_empty() {
            debug!(title = assignment.title(), "assignment lacks letter or number; not an outing");
            return Ok(Vec::new());
        }

        let teams: Vec<&str> = number.split([' ', ',']).filter(|t| !t.is_empty()).collect();
        if teams.len() > 1 {
            info!(letter, ?teams, "assignment names several teams; adding one outing per team");
            let mut names = Vec::new();
            for team in teams {
                names.extend(self.add_outing(&single_team(assignment, letter, team))?);
            }
            return Ok(names);
        }

        Ok(self.ensure_outing(assignment)?.into_iter().collect())
    }

    /// Same as [`Engine::add_outing`], reading the assignment from the
    /// source map first.
    pub fn add_outing_by_id(&mut self, sid: FeatureId) -> Result<Vec<String>, EngineError> {
        match self.source.get_feature(sid)? {
            Some(f) if f.class() == FeatureClass::Assignment => self.add_outing(&f),
            Some(f) => {
                warn!(%sid, class = %f.class(), "expected an assignment");
                Ok(Vec::new())
            }
            None => {
                warn!(%sid, "assignment not found on source map");
                Ok(Vec::new())
            }
        }
    }

    /// Append an operator note to an outing.
    pub fn add_note(&mut self, outing: &str, note: &str) -> Result<(), EngineError> {
        self.store.outing_mut(outing)?.notes.push(note.to_string());
        self.store.add_log(outing, format!("Note added: {note}"))?;
        self.persist()
    }

    fn ensure_outing(&mut self, assignment: &Feature) -> Result<Option<String>, EngineError> {
        let title = outing_title(assignment.title());

        let name = match self.find_existing_outing(assignment.id, &title)? {
            Some(name) => {
                if let Some(bid) = self.store.outing(&name)?.bid {
                    let changed = self.refresh_boundary(&name, bid, assignment)?;
                    let adopted = self.sweep_unclaimed(&name)?;
                    if changed || adopted {
                        self.crop_uncropped()?;
                    }
                    self.persist()?;
                    return Ok(Some(name));
                }
                info!(outing = %name, "existing outing has no boundary; adding it now");
                name
            }
            None => self.create_outing(assignment.id, &title)?,
        };

        self.draw_boundary(&name, assignment)?;
        self.sweep_unclaimed(&name)?;
        self.crop_uncropped()?;
        self.persist()?;
        Ok(Some(name))
    }

    /// An outing with this assignment id and title (or a placeholder title
    /// that now gets the real one), or a same-titled outing with no
    /// assignment id yet, which is adopted.
    fn find_existing_outing(&mut self, sid: FeatureId, title: &str) -> Result<Option<String>, EngineError> {
        let mut found = None;
        let mut adopt = None;
        for (name, o) in &self.store.outings {
            if o.sid == Some(sid) {
                if base_outing_name(name) == title || is_placeholder(name) {
                    found = Some(name.clone());
                    break;
                }
                debug!(outing = %name, "same assignment, different title; previous outing");
            } else if name == title && o.sid.is_none() {
                adopt = Some(name.clone());
                break;
            }
        }

        if let Some(name) = adopt {
            info!(outing = %name, %sid, "outing had no assignment id; linking it");
            self.store.outing_mut(&name)?.sid = Some(sid);
            return Ok(Some(name));
        }

        match found {
            Some(name) if is_placeholder(&name) && !is_placeholder(title) => {
                self.rename_outing(&name, title).map(Some)
            }
            other => Ok(other),
        }
    }

    fn rename_outing(&mut self, from: &str, title: &str) -> Result<String, EngineError> {
        let to = self.store.unique_outing_name(title);
        let (fid, bid) = {
            let o = self.store.outing(from)?;
            (o.fid, o.bid)
        };
        let retitle = Properties::new().with("title", to.as_str());
        for id in fid.into_iter().chain(bid) {
            self.target.edit_feature(id, Some(&retitle), None)?;
        }
        self.store.rename_outing(from, &to)?;
        self.store.add_log(&to, format!("Outing name changed: {from} --> {to}"))?;
        info!(from, to = %to, "outing renamed");
        Ok(to)
    }

    fn create_outing(&mut self, sid: FeatureId, title: &str) -> Result<String, EngineError> {
        let name = self.store.unique_outing_name(title);
        if name != title {
            info!(title, outing = %name, "an outing with this name already exists; disambiguating");
        }
        let fid = self.target.add_folder(&name)?;
        let mut outing = Outing::new(Some(sid));
        outing.fid = Some(fid);
        self.store.insert_outing(&name, outing)?;
        self.store.add_log(&name, "Outing entry created")?;
        self.persist()?;
        info!(outing = %name, "outing created");
        Ok(name)
    }

    fn draw_boundary(&mut self, name: &str, assignment: &Feature) -> Result<(), EngineError> {
        let fid = self.store.outing(name)?.fid;
        let bid = match &assignment.geometry {
            Some(Geometry::Polygon(rings)) => {
                let Some(ring) = rings.first() else {
                    warn!(outing = name, "assignment polygon has no rings");
                    return Ok(());
                };
                let style = PolygonStyle::titled(name)
                    .folder(fid)
                    .stroke(BOUNDARY_WIDTH, BOUNDARY_OPACITY)
                    .fill(0.0);
                self.target.add_polygon(ring, &style)?
            }
            Some(Geometry::LineString(line)) => {
                let style = LineStyle::titled(name)
                    .folder(fid)
                    .stroke(BOUNDARY_WIDTH, BOUNDARY_OPACITY);
                self.target.add_line(line, &style)?
            }
            Some(other) => {
                warn!(outing = name, kind = other.kind(), "unhandled assignment geometry; no boundary drawn");
                return Ok(());
            }
            None => {
                debug!(outing = name, "assignment has no geometry yet");
                return Ok(());
            }
        };

        self.store.outing_mut(name)?.bid = Some(bid);
        self.store.add_log(name, "Added assignment boundary")?;

        if let Some(bounds) = self.target.bounds(&[bid])? {
            if bounds.is_smaller_than(self.config.roaming_threshold_meters) {
                info!(outing = name, "assignment is tiny; treating it as a roaming team");
                self.store.outing_mut(name)?.crop = Some(self.config.roaming_crop_degrees);
            }
        }
        Ok(())
    }

    /// Bring an existing boundary in line with the assignment geometry.
    /// Returns whether anything changed.
    fn refresh_boundary(&mut self, name: &str, bid: FeatureId, assignment: &Feature) -> Result<bool, EngineError> {
        let Some(desired) = assignment.geometry.as_ref().and_then(boundary_geometry) else {
            return Ok(false);
        };
        match self.target.get_feature(bid)? {
            Some(b) if b.geometry.as_ref() == Some(&desired) => Ok(false),
            Some(_) => {
                info!(outing = name, "boundary geometry changed; updating it");
                self.target.edit_feature(bid, None, Some(&desired))?;
                self.store.add_log(name, "Geometry edited for assignment boundary")?;
                Ok(true)
            }
            None => {
                warn!(outing = name, "boundary missing from target map; redrawing");
                self.store.outing_mut(name)?.bid = None;
                self.draw_boundary(name, assignment)?;
                Ok(true)
            }
        }
    }

    /// Adopt unclaimed tracks, clues and live tracks that belong to this
    /// outing. Returns whether anything was adopted.
    pub(crate) fn sweep_unclaimed(&mut self, name: &str) -> Result<bool, EngineError> {
        let (sid, fid) = {
            let o = self.store.outing(name)?;
            (o.sid, o.fid)
        };
        let into_folder = fid.map(|fid| Properties::new().with("folderId", fid.to_string()));
        let mut adopted = false;

        let tracks: Vec<(FeatureId, String)> = self
            .store
            .unclaimed_tracks
            .iter()
            .filter(|(_, title)| self.track_outing(title).as_deref() == Some(name))
            .map(|(tid, title)| (*tid, title.clone()))
            .collect();
        for (tid, title) in tracks {
            if let Some(props) = &into_folder {
                self.target.edit_feature(tid, Some(props), None)?;
            }
            self.store.unclaimed_tracks.remove(&tid);
            self.store.outing_mut(name)?.utids.push(tid);
            self.store.add_log(name, format!("Imported existing track {title}"))?;
            info!(outing = name, track = %title, "adopted unclaimed track");
            adopted = true;
        }

        if let Some(sid) = sid {
            let first_for_sid = self.store.outings_for_assignment(sid).first().map(String::as_str) == Some(name);
            let clues: Vec<FeatureId> = self
                .store
                .unclaimed_clues
                .iter()
                .filter(|(_, owner)| first_for_sid && **owner == ClueOwner::Assignment(sid))
                .map(|(cid, _)| *cid)
                .collect();
            for cid in clues {
                if let Some(props) = &into_folder {
                    self.target.edit_feature(cid, Some(props), None)?;
                }
                let title = self
                    .target
                    .get_feature(cid)?
                    .map(|f| f.title().to_string())
                    .unwrap_or_default();
                self.store.unclaimed_clues.remove(&cid);
                self.store.outing_mut(name)?.cids.push(cid);
                self.store.add_log(name, format!("Added clue {title}"))?;
                adopted = true;
            }
        }

        let live: Vec<FeatureId> = self
            .store
            .app_tracks
            .iter()
            .filter(|(_, entry)| entry.outing().is_none())
            .filter(|(_, entry)| self.app_track_outing(entry.title()).as_deref() == Some(name))
            .map(|(id, _)| *id)
            .collect();
        for id in live {
            let title = match self.store.app_tracks.get_mut(&id) {
                Some(entry) => {
                    entry.1 = Some(name.to_string());
                    entry.0.clone()
                }
                None => continue,
            };
            self.store.add_log(name, format!("Live track {title} in progress"))?;
        }

        Ok(adopted)
    }

    /// Outing a conventional track title belongs to: the latest outing with
    /// the track's base name.
    pub(crate) fn track_outing(&self, title: &str) -> Option<String> {
        let track = TrackName::parse(title)?;
        self.store.latest_outing_named(&track.outing_name())
    }
}

/// Copy of an assignment narrowed to one team.
fn single_team(assignment: &Feature, letter: &str, team: &str) -> Feature {
    let mut f = assignment.clone();
    f.properties.set("number", team);
    f.properties.set("title", format!("{letter} {team}"));
    f
}

/// Geometry the boundary should carry for an assignment geometry.
fn boundary_geometry(geometry: &Geometry) -> Option<Geometry> {
    match geometry {
        Geometry::Polygon(rings) => rings.first().map(|ring| Geometry::Polygon(vec![ring.clone()])),
        Geometry::LineString(line) => Some(Geometry::LineString(line.clone())),
        Geometry::Point(_) => None,
    }
}
