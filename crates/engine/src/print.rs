//! Print layout for one outing: which features go on the page, the page
//! bounds snapped to letter paper, where the legend goes, and the basemap
//! layer string.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};

use debrief_core::clock::physical_now;
use debrief_core::{Bounds, FeatureClass, FeatureId, Position};
use debrief_storage::{PdfRecord, PrintStatus};

use crate::session::MapSession;
use crate::{Engine, EngineError};

const DEFAULT_LAYER: &str = "t";

/// Layer-name patterns and their layer codes, checked in order.
static BASEMAP_LAYERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        ("mapbuilder topo", "mbt"),
        ("mapbuilder hybrid", "mbh"),
        ("scanned topo", "t"),
        ("forest service.*2016.*green", "f16a"),
        ("forest service.*2016.*white", "f16"),
        ("forest service.*2013", "f"),
        ("naip", "n"),
    ]
    .into_iter()
    .map(|(pattern, code)| {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("basemap patterns are valid");
        (re, code)
    })
    .collect()
});

/// Layer code for a basemap name as shown to the user.
pub fn basemap_layer(selection: &str) -> &'static str {
    BASEMAP_LAYERS
        .iter()
        .find(|(re, _)| re.is_match(selection))
        .map_or(DEFAULT_LAYER, |(_, code)| *code)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrintOptions {
    pub basemap: String,
    pub contours: bool,
    pub slope_shading: bool,
    pub mapbuilder_overlay: bool,
    pub utm_grid: bool,
}

impl PrintOptions {
    /// Basemap code plus overlay codes, e.g. `t,c,sf`.
    pub fn layer_string(&self) -> String {
        let mut layers = basemap_layer(&self.basemap).to_string();
        for (on, code) in [(self.contours, ",c"), (self.slope_shading, ",sf"), (self.mapbuilder_overlay, ",mba")] {
            if on {
                layers.push_str(code);
            }
        }
        layers
    }

    pub fn grids(&self) -> Vec<String> {
        if self.utm_grid { vec!["utm".to_string()] } else { Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    /// Paper size in inches, width first.
    pub fn page_size_in(&self) -> [f64; 2] {
        match self {
            Orientation::Landscape => [11.0, 8.5],
            Orientation::Portrait => [8.5, 11.0],
        }
    }

    /// Width over height of the printable map area.
    pub fn target_aspect(&self) -> f64 {
        match self {
            Orientation::Landscape => 1.4955,
            Orientation::Portrait => 0.8027,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub bounds: Bounds,
    pub orientation: Orientation,
}

/// Pick the orientation from the on-paper aspect ratio of `bounds`, then
/// grow the short side so the bounds fill the printable area exactly.
pub fn fit_page(bounds: Bounds) -> PageLayout {
    let lon_mult = bounds.mid_latitude().to_radians().cos();
    let w = (bounds.east - bounds.west) * lon_mult;
    let h = bounds.north - bounds.south;
    let aspect = if h > 0.0 { w / h } else { f64::INFINITY };

    let orientation = if aspect > 1.0 { Orientation::Landscape } else { Orientation::Portrait };
    let target = orientation.target_aspect();

    let mut b = bounds;
    if aspect < target {
        let dlon = (h * target - w) / lon_mult;
        b.west -= dlon / 2.0;
        b.east += dlon / 2.0;
    } else if aspect > target && aspect.is_finite() {
        let dh = w / target - h;
        b.south -= dh / 2.0;
        b.north += dh / 2.0;
    }
    PageLayout { bounds: b, orientation }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

impl Corner {
    /// Preference order when corners tie.
    pub const ALL: [Corner; 4] = [Corner::NorthEast, Corner::NorthWest, Corner::SouthEast, Corner::SouthWest];
}

/// Share of the page width and height the legend box takes.
const LEGEND_FRACTION: (f64, f64) = (0.3, 0.2);

/// The legend box for a corner of the page.
pub fn legend_box(page: &Bounds, corner: Corner) -> Bounds {
    let lw = (page.east - page.west) * LEGEND_FRACTION.0;
    let lh = (page.north - page.south) * LEGEND_FRACTION.1;
    let (west, east) = match corner {
        Corner::NorthWest | Corner::SouthWest => (page.west, page.west + lw),
        Corner::NorthEast | Corner::SouthEast => (page.east - lw, page.east),
    };
    let (south, north) = match corner {
        Corner::NorthEast | Corner::NorthWest => (page.north - lh, page.north),
        Corner::SouthEast | Corner::SouthWest => (page.south, page.south + lh),
    };
    Bounds::new(west, south, east, north)
}

/// The corner whose legend box covers the fewest feature vertices.
pub fn legend_corner<'a>(page: &Bounds, vertices: impl IntoIterator<Item = &'a Position> + Clone) -> Corner {
    Corner::ALL
        .into_iter()
        .min_by_key(|corner| {
            let area = legend_box(page, *corner);
            vertices
                .clone()
                .into_iter()
                .filter(|p| matches!((p.first(), p.get(1)), (Some(lon), Some(lat)) if area.contains(*lon, *lat)))
                .count()
        })
        .unwrap_or(Corner::NorthEast)
}

/// Titles used by more than one of the given features.
pub fn duplicate_titles<'a>(titles: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in titles {
        *counts.entry(t).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(t, _)| t.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintPlan {
    pub outing: String,
    /// Target features to render: the outing's own plus un-foldered markers
    /// and shapes.
    pub feature_ids: Vec<FeatureId>,
    pub layout: PageLayout,
    pub legend: Corner,
    pub layers: String,
    pub grids: Vec<String>,
    /// Track titles appearing more than once; ask before printing.
    pub duplicate_tracks: Vec<String>,
}

impl<S: MapSession, T: MapSession> Engine<S, T> {
    pub fn print_plan(&self, outing: &str, options: &PrintOptions) -> Result<PrintPlan, EngineError> {
        let o = self.store.outing(outing)?;
        let mut ids: Vec<FeatureId> = o.bid.into_iter().collect();
        ids.extend(o.cids.iter().copied());
        ids.extend(o.tids.iter().flatten().copied());

        let Some(bounds) = self.target.bounds(&ids)? else {
            return Err(EngineError::NothingToPrint(outing.to_string()));
        };
        let layout = fit_page(bounds.padded(self.config.print_pad_pct));

        let own: BTreeSet<FeatureId> = ids.iter().copied().collect();
        let loose: Vec<FeatureId> = self
            .target
            .get_features(None, None)?
            .into_iter()
            .filter(|f| !own.contains(&f.id))
            .filter(|f| f.properties.folder_id().is_none())
            .filter(|f| matches!(f.class(), FeatureClass::Marker | FeatureClass::Shape))
            .map(|f| f.id)
            .collect();
        debug!(outing, own = ids.len(), loose = loose.len(), "print features collected");
        ids.extend(loose);

        let mut vertices: Vec<Position> = Vec::new();
        let mut track_titles: Vec<String> = Vec::new();
        for id in &ids {
            let Some(f) = self.target.get_feature(*id)? else {
                continue;
            };
            if let Some(g) = &f.geometry {
                vertices.extend(g.positions().into_iter().cloned());
            }
            if o.tids.iter().flatten().any(|t| t == id) {
                track_titles.push(f.title().to_string());
            }
        }
        let duplicate_tracks = duplicate_titles(track_titles.iter().map(String::as_str));
        if !duplicate_tracks.is_empty() {
            warn!(outing, ?duplicate_tracks, "duplicate track names in outing");
        }

        let legend = legend_corner(&layout.bounds, vertices.iter());
        info!(outing, orientation = ?layout.orientation, ?legend, "print plan ready");
        Ok(PrintPlan {
            outing: outing.to_string(),
            feature_ids: ids,
            layout,
            legend,
            layers: options.layer_string(),
            grids: options.grids(),
            duplicate_tracks,
        })
    }

    /// Remember the PDF generated for an outing.
    pub fn record_pdf(&mut self, outing: &str, pdf_id: &str) -> Result<(), EngineError> {
        let now = physical_now()?;
        self.store.outing_mut(outing)?.pdf = Some(PdfRecord(pdf_id.to_string(), now));
        info!(outing, pdf_id, "PDF recorded");
        self.persist()
    }

    pub fn print_status(&self, outing: &str) -> Result<PrintStatus, EngineError> {
        Ok(self.store.outing(outing)?.print_status())
    }
}
