use serde::{Deserialize, Serialize};

use crate::feature::Position;

/// Rough meters per degree of latitude; good enough for extent checks.
pub const METERS_PER_DEGREE: f64 = 111_111.0;

/// Axis-aligned lon/lat box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self { west, south, east, north }
    }

    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Option<Self> {
        let mut bounds: Option<Bounds> = None;
        for p in positions {
            let (Some(&lon), Some(&lat)) = (p.first(), p.get(1)) else {
                continue;
            };
            bounds = Some(match bounds {
                None => Bounds::new(lon, lat, lon, lat),
                Some(b) => Bounds::new(b.west.min(lon), b.south.min(lat), b.east.max(lon), b.north.max(lat)),
            });
        }
        bounds
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.west.min(other.west),
            self.south.min(other.south),
            self.east.max(other.east),
            self.north.max(other.north),
        )
    }

    pub fn width_meters(&self) -> f64 {
        (self.east - self.west).abs() * METERS_PER_DEGREE * self.south.to_radians().cos()
    }

    pub fn height_meters(&self) -> f64 {
        (self.north - self.south).abs() * METERS_PER_DEGREE
    }

    /// A box narrower or shorter than `threshold_m` in either direction.
    pub fn is_smaller_than(&self, threshold_m: f64) -> bool {
        self.width_meters() < threshold_m || self.height_meters() < threshold_m
    }

    pub fn mid_latitude(&self) -> f64 {
        (self.north + self.south) / 2.0
    }

    /// Grow each side by `pct` percent of the box's span.
    pub fn padded(&self, pct: f64) -> Bounds {
        let dx = (self.east - self.west) * pct / 100.0;
        let dy = (self.north - self.south) * pct / 100.0;
        Bounds::new(self.west - dx, self.south - dy, self.east + dx, self.north + dy)
    }

    pub fn expanded(&self, degrees: f64) -> Bounds {
        Bounds::new(
            self.west - degrees,
            self.south - degrees,
            self.east + degrees,
            self.north + degrees,
        )
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }

    /// `[west, south, east, north]`, the order print requests use.
    pub fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_all_positions() {
        let pts = vec![vec![-120.0, 39.0], vec![-120.5, 39.2, 1500.0], vec![-119.8, 38.9]];
        let b = Bounds::from_positions(&pts).unwrap();
        assert_eq!(b, Bounds::new(-120.5, 38.9, -119.8, 39.2));
    }

    #[test]
    fn empty_positions_have_no_bounds() {
        let pts: Vec<Position> = Vec::new();
        assert!(Bounds::from_positions(&pts).is_none());
    }

    #[test]
    fn tiny_box_is_smaller_than_threshold() {
        let tiny = Bounds::new(-120.0, 39.0, -120.0001, 39.0001);
        assert!(tiny.is_smaller_than(50.0));

        let big = Bounds::new(-120.0, 39.0, -119.99, 39.01);
        assert!(!big.is_smaller_than(50.0));
    }

    #[test]
    fn thin_strip_counts_as_small() {
        // wide but only ~11 m tall
        let strip = Bounds::new(-120.0, 39.0, -119.9, 39.0001);
        assert!(strip.is_smaller_than(50.0));
    }

    #[test]
    fn padding_grows_each_side() {
        let b = Bounds::new(0.0, 0.0, 10.0, 20.0).padded(10.0);
        assert_eq!(b, Bounds::new(-1.0, -2.0, 11.0, 22.0));
    }
}
