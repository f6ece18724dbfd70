//! Track import and cropping.
//!
//! A line titled per the track convention is mirrored with its suffix color
//! into its outing's folder, then cropped to the outing boundary. Lines that
//! cannot be cropped yet wait in `utids`; lines with no outing wait in
//! `unclaimedTracks`.

use tracing::{debug, info, warn};

use debrief_core::{Feature, FeatureId, Geometry};

use crate::session::{CropOutcome, LineStyle, MapSession};
use crate::{Cause, Engine, EngineError};

impl<S: MapSession, T: MapSession> Engine<S, T> {
    pub(crate) fn import_line(&mut self, line: &Feature, cause: Cause) -> Result<(), EngineError> {
        let Some(Geometry::LineString(coordinates)) = &line.geometry else {
            return Ok(());
        };

        let track = line.track_name();
        if let Some(track) = &track {
            if let Some(outing) = self.store.latest_outing_named(&track.outing_name()) {
                return self.import_track(line, coordinates, &track.display_title(), track.color(), &outing, cause);
            }
        }

        let mut style = LineStyle::mirror(&line.properties);
        if let Some(track) = &track {
            style.title = track.display_title();
            style.color = Some(track.color().to_string());
        }
        let tid = self.target.add_line(coordinates, &style)?;
        self.store.add_correspondence(line.id, [tid]);
        if track.is_some() {
            debug!(track = %style.title, "no outing for track yet; holding it unclaimed");
            self.store.unclaimed_tracks.insert(tid, style.title.clone());
        } else {
            debug!(title = line.title(), "mirrored line");
        }
        self.persist()
    }

    fn import_track(
        &mut self,
        line: &Feature,
        coordinates: &[Vec<f64>],
        title: &str,
        color: &str,
        outing: &str,
        cause: Cause,
    ) -> Result<(), EngineError> {
        let (fid, bid) = {
            let o = self.store.outing(outing)?;
            (o.fid, o.bid)
        };
        let style = LineStyle::titled(title).color(color).folder(fid);
        let tid = self.target.add_line(coordinates, &style)?;

        self.store.add_correspondence(line.id, [tid]);
        self.store.outing_mut(outing)?.utids.push(tid);
        self.store.add_log(outing, cause.track_log(title))?;
        info!(outing, track = title, ?cause, "track imported");

        if let Some(bid) = bid {
            self.crop_track(outing, tid, bid)?;
        }
        self.persist()
    }

    /// Crop one uncropped track of an outing. A successful crop moves it from
    /// `utids` into a new segment group; a failed one leaves it in place.
    pub(crate) fn crop_track(&mut self, outing: &str, uid: FeatureId, bid: FeatureId) -> Result<bool, EngineError> {
        let tolerance = self
            .store
            .outing(outing)?
            .crop
            .unwrap_or(self.config.crop_degrees);

        let segments = match self.target.crop(uid, bid, tolerance) {
            Ok(CropOutcome::Segments(ids)) if !ids.is_empty() => ids,
            Ok(CropOutcome::Segments(_)) => {
                debug!(outing, %uid, "crop returned no segments; track stays uncropped");
                return Ok(false);
            }
            Ok(CropOutcome::Failed) => {
                debug!(outing, %uid, "crop not possible yet; track stays uncropped");
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, outing, %uid, "crop request failed; track stays uncropped");
                return Ok(false);
            }
        };

        let o = self.store.outing_mut(outing)?;
        o.utids.retain(|id| *id != uid);
        o.tids.push(segments.clone());
        self.store.replace_target(uid, &segments);
        Ok(true)
    }

    /// Retry the crop for every uncropped track of every outing that has a
    /// boundary.
    pub(crate) fn crop_uncropped(&mut self) -> Result<usize, EngineError> {
        let pending: Vec<(String, FeatureId, Vec<FeatureId>)> = self
            .store
            .outings
            .iter()
            .filter(|(_, o)| !o.utids.is_empty())
            .filter_map(|(name, o)| o.bid.map(|bid| (name.clone(), bid, o.utids.clone())))
            .collect();

        let mut cropped = 0;
        for (outing, bid, utids) in pending {
            for uid in utids {
                if self.crop_track(&outing, uid, bid)? {
                    cropped += 1;
                }
            }
        }
        if cropped > 0 {
            self.persist()?;
        }
        Ok(cropped)
    }
}
