//! Map feature model shared by the source and target sides of the mirror.
//!
//! A feature is `{id, properties, geometry}`. The `class` lives inside the
//! properties, as it does on the wire; [`FeatureClass`] is the closed set the
//! reconciler dispatches on.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::geo::Bounds;
use crate::ids::FeatureId;
use crate::track::TrackName;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FeatureClass {
    Assignment,
    Shape,
    Marker,
    Clue,
    Folder,
    AppTrack,
    /// Any class the engine does not handle. Kept verbatim so it can be logged.
    Unknown(String),
}

impl FeatureClass {
    pub fn as_str(&self) -> &str {
        match self {
            FeatureClass::Assignment => "Assignment",
            FeatureClass::Shape => "Shape",
            FeatureClass::Marker => "Marker",
            FeatureClass::Clue => "Clue",
            FeatureClass::Folder => "Folder",
            FeatureClass::AppTrack => "AppTrack",
            FeatureClass::Unknown(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Assignment" => FeatureClass::Assignment,
            "Shape" => FeatureClass::Shape,
            "Marker" => FeatureClass::Marker,
            "Clue" => FeatureClass::Clue,
            "Folder" => FeatureClass::Folder,
            "AppTrack" => FeatureClass::AppTrack,
            other => FeatureClass::Unknown(other.to_string()),
        }
    }
}

impl From<String> for FeatureClass {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<FeatureClass> for String {
    fn from(class: FeatureClass) -> Self {
        class.as_str().to_string()
    }
}

impl fmt::Display for FeatureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[lon, lat]`, optionally followed by elevation and time.
pub type Position = Vec<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    LineString(Vec<Position>),
    Polygon(Vec<Vec<Position>>),
}

impl Geometry {
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
        }
    }

    /// Every vertex, rings flattened.
    pub fn positions(&self) -> Vec<&Position> {
        match self {
            Geometry::Point(p) => vec![p],
            Geometry::LineString(line) => line.iter().collect(),
            Geometry::Polygon(rings) => rings.iter().flatten().collect(),
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_positions(self.positions())
    }
}

/// Free-form property bag. Known keys get typed accessors; everything else
/// passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Map<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn class(&self) -> FeatureClass {
        FeatureClass::parse(self.get_str("class").unwrap_or_default())
    }

    /// Title with trailing whitespace removed. Assignments that have a letter
    /// but no number arrive with a trailing space.
    pub fn title(&self) -> &str {
        self.get_str("title").unwrap_or_default().trim_end()
    }

    pub fn letter(&self) -> &str {
        self.get_str("letter").unwrap_or_default().trim()
    }

    pub fn number(&self) -> &str {
        self.get_str("number").unwrap_or_default().trim()
    }

    pub fn description(&self) -> &str {
        self.get_str("description").unwrap_or_default()
    }

    pub fn folder_id(&self) -> Option<FeatureId> {
        self.get_str("folderId").and_then(|s| FeatureId::parse(s).ok())
    }

    pub fn assignment_id(&self) -> Option<FeatureId> {
        self.get_str("assignmentId")
            .filter(|s| !s.is_empty())
            .and_then(|s| FeatureId::parse(s).ok())
    }

    /// True when every key in `self` has the same value in `other`.
    pub fn is_subset_of(&self, other: &Properties) -> bool {
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }

    /// Copy every key of `overlay` into `self`.
    pub fn merge(&mut self, overlay: &Properties) {
        for (k, v) in &overlay.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl From<Map<String, Value>> for Properties {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

impl Feature {
    pub fn new(id: FeatureId, properties: Properties, geometry: Option<Geometry>) -> Self {
        Self { id, properties, geometry }
    }

    pub fn class(&self) -> FeatureClass {
        self.properties.class()
    }

    pub fn title(&self) -> &str {
        self.properties.title()
    }

    pub fn is_line(&self) -> bool {
        matches!(self.geometry, Some(Geometry::LineString(_)))
    }

    /// The parsed track name when this is a Shape line titled per the track
    /// naming convention.
    pub fn track_name(&self) -> Option<TrackName> {
        if self.class() == FeatureClass::Shape && self.is_line() {
            TrackName::parse(self.title())
        } else {
            None
        }
    }
}
