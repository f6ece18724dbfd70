use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use debrief_core::{Bounds, Feature, FeatureClass, FeatureId, Geometry, Position, Properties};
use debrief_engine::{CropOutcome, LineStyle, MapSession, MarkerStyle, PolygonStyle, SessionError, SinceBatch};

/// Server clock step per mutation. Larger than the poller's overlap so the
/// overlap window is exercised without hiding real changes.
const TICK_MS: u64 = 1_000;

#[derive(Debug, Default)]
struct MapState {
    features: BTreeMap<FeatureId, Feature>,
    /// Server time of each feature's last change.
    updated: BTreeMap<FeatureId, u64>,
    clock: u64,
    writes: usize,
    fail_writes: usize,
    unavailable: bool,
}

impl MapState {
    fn tick(&mut self, id: FeatureId) {
        self.clock += TICK_MS;
        self.updated.insert(id, self.clock);
    }

    fn check_read(&self) -> Result<(), SessionError> {
        if self.unavailable {
            return Err(SessionError::Unavailable("map offline".into()));
        }
        Ok(())
    }

    /// Gate for engine-issued writes: counts them and applies injected
    /// failures.
    fn begin_write(&mut self) -> Result<(), SessionError> {
        self.check_read()?;
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(SessionError::Rejected("injected write failure".into()));
        }
        self.writes += 1;
        Ok(())
    }

    fn insert(&mut self, feature: Feature) -> FeatureId {
        let id = feature.id;
        self.features.insert(id, feature);
        self.tick(id);
        id
    }
}

/// In-memory map server. Clones share the same map, so a test can keep a
/// handle while the engine owns another.
#[derive(Debug, Clone)]
pub struct FakeMapSession {
    map_id: String,
    state: Arc<Mutex<MapState>>,
}

impl FakeMapSession {
    pub fn new(map_id: &str) -> Self {
        Self {
            map_id: map_id.to_string(),
            state: Arc::new(Mutex::new(MapState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Direct edits, as a user of the map would make them. Not counted as
    // engine writes.
    // ========================================================================

    pub fn put(&self, properties: Properties, geometry: Option<Geometry>) -> Feature {
        let feature = Feature::new(FeatureId::new(), properties, geometry);
        self.state().insert(feature.clone());
        feature
    }

    /// Merge properties into an existing feature and return the result.
    pub fn set_properties(&self, id: FeatureId, properties: &Properties) -> Option<Feature> {
        let mut s = self.state();
        let f = s.features.get_mut(&id)?;
        f.properties.merge(properties);
        let f = f.clone();
        s.tick(id);
        Some(f)
    }

    pub fn set_geometry(&self, id: FeatureId, geometry: Geometry) -> Option<Feature> {
        let mut s = self.state();
        let f = s.features.get_mut(&id)?;
        f.geometry = Some(geometry);
        let f = f.clone();
        s.tick(id);
        Some(f)
    }

    pub fn remove(&self, id: FeatureId) -> Option<Feature> {
        let mut s = self.state();
        s.updated.remove(&id);
        s.clock += TICK_MS;
        s.features.remove(&id)
    }

    // ========================================================================
    // Inspection and fault injection
    // ========================================================================

    pub fn feature(&self, id: FeatureId) -> Option<Feature> {
        self.state().features.get(&id).cloned()
    }

    pub fn features(&self) -> Vec<Feature> {
        self.state().features.values().cloned().collect()
    }

    pub fn titled(&self, title: &str) -> Vec<Feature> {
        self.state()
            .features
            .values()
            .filter(|f| f.title() == title)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.state().features.contains_key(&id)
    }

    /// Writes the engine has issued against this map.
    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    /// Fail the next `n` engine writes.
    pub fn fail_next_writes(&self, n: usize) {
        self.state().fail_writes = n;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    fn add(&mut self, properties: Properties, geometry: Option<Geometry>) -> Result<FeatureId, SessionError> {
        let mut s = self.state();
        s.begin_write()?;
        Ok(s.insert(Feature::new(FeatureId::new(), properties, geometry)))
    }
}

impl MapSession for FakeMapSession {
    fn map_id(&self) -> &str {
        &self.map_id
    }

    fn get_features(
        &self,
        class: Option<&FeatureClass>,
        since_ms: Option<u64>,
    ) -> Result<Vec<Feature>, SessionError> {
        let s = self.state();
        s.check_read()?;
        Ok(s.features
            .values()
            .filter(|f| class.is_none_or(|c| f.class() == *c))
            .filter(|f| since_ms.is_none_or(|t| s.updated.get(&f.id).is_some_and(|u| *u > t)))
            .cloned()
            .collect())
    }

    fn get_feature(&self, id: FeatureId) -> Result<Option<Feature>, SessionError> {
        let s = self.state();
        s.check_read()?;
        Ok(s.features.get(&id).cloned())
    }

    fn since(&self, since_ms: u64) -> Result<SinceBatch, SessionError> {
        let s = self.state();
        s.check_read()?;
        let features = s
            .features
            .values()
            .filter(|f| s.updated.get(&f.id).is_some_and(|u| *u > since_ms))
            .cloned()
            .collect();
        Ok(SinceBatch {
            timestamp: s.clock,
            features,
            ids: Some(s.features.keys().copied().collect()),
        })
    }

    fn add_folder(&mut self, title: &str) -> Result<FeatureId, SessionError> {
        let props = Properties::new()
            .with("class", FeatureClass::Folder.as_str())
            .with("title", title);
        self.add(props, None)
    }

    fn add_marker(&mut self, position: &Position, style: &MarkerStyle) -> Result<FeatureId, SessionError> {
        self.add(style.to_properties(), Some(Geometry::Point(position.clone())))
    }

    fn add_line(&mut self, coordinates: &[Position], style: &LineStyle) -> Result<FeatureId, SessionError> {
        self.add(style.to_properties(), Some(Geometry::LineString(coordinates.to_vec())))
    }

    fn add_polygon(&mut self, ring: &[Position], style: &PolygonStyle) -> Result<FeatureId, SessionError> {
        self.add(style.to_properties(), Some(Geometry::Polygon(vec![ring.to_vec()])))
    }

    fn edit_feature(
        &mut self,
        id: FeatureId,
        properties: Option<&Properties>,
        geometry: Option<&Geometry>,
    ) -> Result<bool, SessionError> {
        let mut s = self.state();
        s.begin_write()?;
        let Some(f) = s.features.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(p) = properties {
            f.properties.merge(p);
        }
        if let Some(g) = geometry {
            f.geometry = Some(g.clone());
        }
        s.tick(id);
        Ok(true)
    }

    fn del_feature(&mut self, id: FeatureId, _class: &FeatureClass) -> Result<bool, SessionError> {
        let mut s = self.state();
        s.begin_write()?;
        s.updated.remove(&id);
        Ok(s.features.remove(&id).is_some())
    }

    /// Keeps the runs of the line's vertices that fall inside the boundary's
    /// bounding box grown by the tolerance. The first run replaces the
    /// original line; later runs become new lines titled `<title>:2`, `:3`...
    /// Fails, leaving the line alone, when no run has two vertices.
    fn crop(
        &mut self,
        line: FeatureId,
        boundary: FeatureId,
        tolerance_degrees: f64,
    ) -> Result<CropOutcome, SessionError> {
        let mut s = self.state();
        s.check_read()?;

        let area = match s.features.get(&boundary).and_then(|b| b.geometry.as_ref()) {
            Some(Geometry::Polygon(rings)) => match rings.first().and_then(|r| Bounds::from_positions(r)) {
                Some(b) => b.expanded(tolerance_degrees),
                None => return Ok(CropOutcome::Failed),
            },
            _ => return Ok(CropOutcome::Failed),
        };
        let Some(original) = s.features.get(&line).cloned() else {
            return Ok(CropOutcome::Failed);
        };
        let Some(Geometry::LineString(coords)) = &original.geometry else {
            return Ok(CropOutcome::Failed);
        };

        let inside = |p: &Position| matches!((p.first(), p.get(1)), (Some(lon), Some(lat)) if area.contains(*lon, *lat));
        if !coords.iter().any(inside) {
            return Ok(CropOutcome::Failed);
        }
        if coords.iter().all(inside) {
            return Ok(CropOutcome::Segments(vec![line]));
        }

        let mut runs: Vec<Vec<Position>> = Vec::new();
        let mut current: Vec<Position> = Vec::new();
        for p in coords {
            if inside(p) {
                current.push(p.clone());
            } else if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        runs.retain(|r| r.len() >= 2);
        if runs.is_empty() {
            return Ok(CropOutcome::Failed);
        }

        s.begin_write()?;

        let mut ids = vec![line];
        let title = original.title().to_string();
        for (i, run) in runs.into_iter().enumerate() {
            if i == 0 {
                if let Some(f) = s.features.get_mut(&line) {
                    f.geometry = Some(Geometry::LineString(run));
                }
                s.tick(line);
            } else {
                let mut props = original.properties.clone();
                props.set("title", format!("{title}:{}", i + 1));
                ids.push(s.insert(Feature::new(FeatureId::new(), props, Some(Geometry::LineString(run)))));
            }
        }
        Ok(CropOutcome::Segments(ids))
    }
}

/// Closed square ring centered on a point.
pub fn square(lon: f64, lat: f64, half_side: f64) -> Geometry {
    Geometry::Polygon(vec![vec![
        vec![lon - half_side, lat - half_side],
        vec![lon + half_side, lat - half_side],
        vec![lon + half_side, lat + half_side],
        vec![lon - half_side, lat + half_side],
        vec![lon - half_side, lat - half_side],
    ]])
}

pub fn line(points: &[(f64, f64)]) -> Geometry {
    Geometry::LineString(points.iter().map(|(lon, lat)| vec![*lon, *lat]).collect())
}

pub fn point(lon: f64, lat: f64) -> Geometry {
    Geometry::Point(vec![lon, lat])
}

/// Ids of every feature on the map.
pub fn ids_of(features: &[Feature]) -> BTreeSet<FeatureId> {
    features.iter().map(|f| f.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_boundary() -> (FakeMapSession, FeatureId) {
        let mut map = FakeMapSession::new("T");
        let Geometry::Polygon(rings) = square(0.0, 0.0, 1.0) else {
            unreachable!()
        };
        let bid = map.add_polygon(&rings[0], &PolygonStyle::titled("AA 101")).unwrap();
        (map, bid)
    }

    #[test]
    fn crop_inside_keeps_line_untouched() {
        let (mut map, bid) = session_with_boundary();
        let Geometry::LineString(coords) = line(&[(0.0, 0.0), (0.5, 0.5)]) else {
            unreachable!()
        };
        let tid = map.add_line(&coords, &LineStyle::titled("AA101a")).unwrap();
        let writes = map.write_count();
        assert_eq!(map.crop(tid, bid, 0.001).unwrap(), CropOutcome::Segments(vec![tid]));
        assert_eq!(map.write_count(), writes);
    }

    #[test]
    fn crop_splits_into_segments() {
        let (mut map, bid) = session_with_boundary();
        let Geometry::LineString(coords) =
            line(&[(0.0, 0.0), (0.5, 0.0), (3.0, 0.0), (3.0, 0.5), (0.5, 0.5), (0.0, 0.5)])
        else {
            unreachable!()
        };
        let tid = map.add_line(&coords, &LineStyle::titled("AA101a")).unwrap();
        let CropOutcome::Segments(ids) = map.crop(tid, bid, 0.001).unwrap() else {
            panic!("expected segments");
        };
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], tid);
        assert_eq!(map.feature(ids[1]).unwrap().title(), "AA101a:2");
    }

    #[test]
    fn crop_outside_fails_and_missing_boundary_fails() {
        let (mut map, bid) = session_with_boundary();
        let Geometry::LineString(coords) = line(&[(5.0, 5.0), (6.0, 6.0)]) else {
            unreachable!()
        };
        let tid = map.add_line(&coords, &LineStyle::titled("AA101a")).unwrap();
        assert_eq!(map.crop(tid, bid, 0.001).unwrap(), CropOutcome::Failed);
        assert_eq!(map.crop(tid, FeatureId::new(), 0.001).unwrap(), CropOutcome::Failed);
    }

    #[test]
    fn crop_with_single_vertex_inside_fails_without_writing() {
        let (mut map, bid) = session_with_boundary();
        let Geometry::LineString(coords) = line(&[(0.5, 0.5), (3.0, 3.0), (4.0, 4.0)]) else {
            unreachable!()
        };
        let tid = map.add_line(&coords, &LineStyle::titled("AA101a")).unwrap();
        let writes = map.write_count();
        assert_eq!(map.crop(tid, bid, 0.001).unwrap(), CropOutcome::Failed);
        assert_eq!(map.write_count(), writes);
        assert_eq!(map.feature(tid).unwrap().geometry, Some(Geometry::LineString(coords)));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut map = FakeMapSession::new("T");
        map.fail_next_writes(1);
        assert!(map.add_folder("AA 101").is_err());
        assert!(map.add_folder("AA 101").is_ok());
        assert_eq!(map.write_count(), 1);
    }

    #[test]
    fn since_reports_changes_after_cursor() {
        let map = FakeMapSession::new("S");
        let a = map.put(Properties::new().with("class", "Marker").with("title", "A"), Some(point(0.0, 0.0)));
        let first = map.since(0).unwrap();
        assert_eq!(first.features.len(), 1);

        let b = map.put(Properties::new().with("class", "Marker").with("title", "B"), Some(point(1.0, 1.0)));
        let next = map.since(first.timestamp).unwrap();
        assert_eq!(ids_of(&next.features), [b.id].into_iter().collect());
        assert_eq!(next.ids.unwrap().len(), 2);
        assert!(map.contains(a.id));
    }
}
