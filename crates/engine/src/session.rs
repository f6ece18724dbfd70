//! The map-session seam. Both the source (incident) map and the target
//! (debrief) map are reached through [`MapSession`]; the engine never talks to
//! a map server any other way.

use std::collections::BTreeSet;

use thiserror::Error;

use debrief_core::{Bounds, Feature, FeatureClass, FeatureId, Geometry, Position, Properties};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("map session unavailable: {0}")]
    Unavailable(String),

    #[error("feature not found: {0}")]
    NotFound(FeatureId),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Result of a crop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CropOutcome {
    /// Ids of the pieces left after cropping. The first piece keeps the
    /// original line's id. Empty when nothing of the line was inside.
    Segments(Vec<FeatureId>),
    /// The crop could not be performed (no boundary, no intersection, or a
    /// boundary that is not a polygon). The line is left as it was.
    Failed,
}

/// One "since" poll: everything changed after the requested timestamp.
#[derive(Debug, Clone, Default)]
pub struct SinceBatch {
    /// Server time of this response; the next poll asks from here.
    pub timestamp: u64,
    pub features: Vec<Feature>,
    /// Every live id on the map, when the server includes it.
    pub ids: Option<BTreeSet<FeatureId>>,
}

impl SinceBatch {
    /// Live ids, falling back to the ids of the returned features.
    pub fn live_ids(&self) -> BTreeSet<FeatureId> {
        match &self.ids {
            Some(ids) => ids.clone(),
            None => self.features.iter().map(|f| f.id).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineStyle {
    pub title: String,
    pub folder_id: Option<FeatureId>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub width: Option<f64>,
    pub opacity: Option<f64>,
    pub pattern: Option<String>,
}

impl LineStyle {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Style copied from a source line's properties.
    pub fn mirror(props: &Properties) -> Self {
        Self {
            title: props.title().to_string(),
            folder_id: None,
            color: props.get_str("stroke").map(str::to_string),
            description: props.get_str("description").map(str::to_string),
            width: props.get("stroke-width").and_then(|v| v.as_f64()),
            opacity: props.get("stroke-opacity").and_then(|v| v.as_f64()),
            pattern: props.get_str("pattern").map(str::to_string),
        }
    }

    pub fn folder(mut self, folder_id: Option<FeatureId>) -> Self {
        self.folder_id = folder_id;
        self
    }

    pub fn color(mut self, color: &str) -> Self {
        self.color = Some(color.to_string());
        self
    }

    pub fn stroke(mut self, width: f64, opacity: f64) -> Self {
        self.width = Some(width);
        self.opacity = Some(opacity);
        self
    }

    pub fn to_properties(&self) -> Properties {
        let mut p = Properties::new()
            .with("class", FeatureClass::Shape.as_str())
            .with("title", self.title.as_str());
        if let Some(fid) = self.folder_id {
            p.set("folderId", fid.to_string());
        }
        if let Some(c) = &self.color {
            p.set("stroke", c.as_str());
        }
        if let Some(d) = &self.description {
            p.set("description", d.as_str());
        }
        if let Some(w) = self.width {
            p.set("stroke-width", w);
        }
        if let Some(o) = self.opacity {
            p.set("stroke-opacity", o);
        }
        if let Some(pat) = &self.pattern {
            p.set("pattern", pat.as_str());
        }
        p
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonStyle {
    pub line: LineStyle,
    pub fill_opacity: Option<f64>,
}

impl PolygonStyle {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            line: LineStyle::titled(title),
            fill_opacity: None,
        }
    }

    pub fn mirror(props: &Properties) -> Self {
        Self {
            line: LineStyle::mirror(props),
            fill_opacity: props.get("fill-opacity").and_then(|v| v.as_f64()),
        }
    }

    pub fn folder(mut self, folder_id: Option<FeatureId>) -> Self {
        self.line.folder_id = folder_id;
        self
    }

    pub fn stroke(mut self, width: f64, opacity: f64) -> Self {
        self.line = self.line.stroke(width, opacity);
        self
    }

    pub fn fill(mut self, opacity: f64) -> Self {
        self.fill_opacity = Some(opacity);
        self
    }

    pub fn to_properties(&self) -> Properties {
        let mut p = self.line.to_properties();
        if let Some(f) = self.fill_opacity {
            p.set("fill-opacity", f);
        }
        p
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerStyle {
    pub title: String,
    pub folder_id: Option<FeatureId>,
    pub color: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub rotation: Option<f64>,
    pub size: Option<f64>,
}

impl MarkerStyle {
    pub fn mirror(props: &Properties) -> Self {
        Self {
            title: props.title().to_string(),
            folder_id: None,
            color: props.get_str("marker-color").map(str::to_string),
            symbol: props.get_str("marker-symbol").map(str::to_string),
            description: props.get_str("description").map(str::to_string),
            rotation: props.get("marker-rotation").and_then(|v| v.as_f64()),
            size: Some(props.get("marker-size").and_then(|v| v.as_f64()).unwrap_or(1.0)),
        }
    }

    /// Marker standing in for a source clue.
    pub fn clue(props: &Properties) -> Self {
        Self {
            title: props.title().to_string(),
            symbol: Some("clue".to_string()),
            description: Some(props.description().to_string()),
            ..Self::default()
        }
    }

    pub fn folder(mut self, folder_id: Option<FeatureId>) -> Self {
        self.folder_id = folder_id;
        self
    }

    pub fn to_properties(&self) -> Properties {
        let mut p = Properties::new()
            .with("class", FeatureClass::Marker.as_str())
            .with("title", self.title.as_str());
        if let Some(fid) = self.folder_id {
            p.set("folderId", fid.to_string());
        }
        if let Some(c) = &self.color {
            p.set("marker-color", c.as_str());
        }
        if let Some(s) = &self.symbol {
            p.set("marker-symbol", s.as_str());
        }
        if let Some(d) = &self.description {
            p.set("description", d.as_str());
        }
        if let Some(r) = self.rotation {
            p.set("marker-rotation", r);
        }
        if let Some(s) = self.size {
            p.set("marker-size", s);
        }
        p
    }
}

/// Primitive operations of a remote map.
pub trait MapSession {
    /// Map identifier, used to name the state file.
    fn map_id(&self) -> &str;

    /// Features of one class (or all), optionally only those changed since
    /// `since_ms`.
    fn get_features(
        &self,
        class: Option<&FeatureClass>,
        since_ms: Option<u64>,
    ) -> Result<Vec<Feature>, SessionError>;

    fn get_feature(&self, id: FeatureId) -> Result<Option<Feature>, SessionError>;

    /// The long-poll "since" request behind the sync loop.
    fn since(&self, since_ms: u64) -> Result<SinceBatch, SessionError>;

    fn add_folder(&mut self, title: &str) -> Result<FeatureId, SessionError>;

    fn add_marker(&mut self, position: &Position, style: &MarkerStyle) -> Result<FeatureId, SessionError>;

    fn add_line(&mut self, coordinates: &[Position], style: &LineStyle) -> Result<FeatureId, SessionError>;

    fn add_polygon(&mut self, ring: &[Position], style: &PolygonStyle) -> Result<FeatureId, SessionError>;

    /// Merge `properties` into the feature's properties and/or replace its
    /// geometry. Returns false when the feature does not exist.
    fn edit_feature(
        &mut self,
        id: FeatureId,
        properties: Option<&Properties>,
        geometry: Option<&Geometry>,
    ) -> Result<bool, SessionError>;

    fn del_feature(&mut self, id: FeatureId, class: &FeatureClass) -> Result<bool, SessionError>;

    /// Crop a line to a polygon boundary grown by `tolerance_degrees`.
    fn crop(
        &mut self,
        line: FeatureId,
        boundary: FeatureId,
        tolerance_degrees: f64,
    ) -> Result<CropOutcome, SessionError>;

    fn live_ids(&self) -> Result<BTreeSet<FeatureId>, SessionError> {
        Ok(self.get_features(None, None)?.into_iter().map(|f| f.id).collect())
    }

    /// Bounding box of the given features' geometries.
    fn bounds(&self, ids: &[FeatureId]) -> Result<Option<Bounds>, SessionError> {
        let mut bounds: Option<Bounds> = None;
        for id in ids {
            let Some(b) = self
                .get_feature(*id)?
                .and_then(|f| f.geometry)
                .and_then(|g| g.bounds())
            else {
                continue;
            };
            bounds = Some(match bounds {
                Some(acc) => acc.union(&b),
                None => b,
            });
        }
        Ok(bounds)
    }
}
